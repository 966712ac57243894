//! Annotation sandbox
//!
//! Scripts are parsed into a small AST and interpreted against a
//! [`DrawingSurface`]. The only names in scope are the drawing primitives and
//! the `W(n)`/`H(n)` coordinate helpers; nothing can reach the host.

mod interpreter;
mod parser;

pub use interpreter::{CoordinateMapper, Interpreter, MAX_STATEMENTS};
pub use parser::{BinaryOp, Expr, MAX_NESTING, Statement, StatementKind, parse_script};

use log::{debug, warn};

use super::canvas::DrawingSurface;
use super::error::AnnotationError;

/// Run `script` on `surface`.
///
/// `width` and `height` are the visible region in page units (output pixels
/// divided by `dpi`). Drawing done before a failing statement stays on the
/// surface.
pub fn execute_annotation(
    script: &str,
    surface: &mut dyn DrawingSurface,
    dpi: f32,
    width: f32,
    height: f32,
) -> Result<(), AnnotationError> {
    let statements = parse_script(script).inspect_err(|e| warn!("Annotation rejected: {e}"))?;
    debug!(
        "Running {} annotation statements on {}x{} surface",
        statements.len(),
        surface.width(),
        surface.height()
    );
    let mapper = CoordinateMapper { dpi, width, height };
    Interpreter::new(surface, mapper)
        .run(&statements)
        .inspect_err(|e| warn!("Annotation failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::canvas::{Canvas, Color, SubPath};

    /// Records calls instead of drawing
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl DrawingSurface for Recorder {
        fn width(&self) -> u32 {
            200
        }
        fn height(&self) -> u32 {
            100
        }
        fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color) {
            self.calls
                .push(format!("fillRect {x} {y} {w} {h} {},{},{},{}", color.r, color.g, color.b, color.a));
        }
        fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, _color: Color, lw: f32) {
            self.calls.push(format!("strokeRect {x} {y} {w} {h} lw={lw}"));
        }
        fn clear_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
            self.calls.push(format!("clearRect {x} {y} {w} {h}"));
        }
        fn stroke_path(&mut self, path: &[SubPath], _color: Color, _lw: f32) {
            let points: usize = path.iter().map(|s| s.points.len()).sum();
            self.calls.push(format!("stroke {} {points}", path.len()));
        }
        fn fill_path(&mut self, path: &[SubPath], _color: Color) {
            self.calls.push(format!("fill {}", path.len()));
        }
        fn fill_text(&mut self, text: &str, x: f32, y: f32, font: &str, _color: Color) {
            self.calls.push(format!("text {text} {x} {y} {font}"));
        }
    }

    #[test]
    fn helpers_scale_fractions_and_pass_pixels() {
        let mapper = CoordinateMapper {
            dpi: 2.0,
            width: 100.0,
            height: 50.0,
        };
        assert_eq!(mapper.w(0.5), 100.0);
        assert_eq!(mapper.h(0.5), 50.0);
        assert_eq!(mapper.w(40.0), 40.0);
        assert_eq!(mapper.w(1.0), 1.0);
        assert_eq!(mapper.h(0.0), 0.0);
    }

    #[test]
    fn draws_with_mapped_coordinates() {
        let mut rec = Recorder::default();
        execute_annotation(
            "ctx.fillStyle = '#ff000080'\nctx.fillRect(W(0.25), H(0.5), W(0.5), 10)",
            &mut rec,
            2.0,
            100.0,
            50.0,
        )
        .unwrap();
        assert_eq!(rec.calls, vec!["fillRect 50 50 100 10 255,0,0,128"]);
    }

    #[test]
    fn default_font_scales_with_dpi() {
        let mut rec = Recorder::default();
        execute_annotation("fillText('A', 1, 2)", &mut rec, 2.0, 10.0, 10.0).unwrap();
        assert_eq!(rec.calls, vec!["text A 1 2 50px sans-serif"]);
    }

    #[test]
    fn paths_and_state_stack() {
        let mut rec = Recorder::default();
        let script = "\
beginPath(); moveTo(0, 0); lineTo(10, 0); lineTo(10, 10); closePath(); stroke()
save(); lineWidth = 4; strokeRect(0, 0, 5, 5); restore(); strokeRect(0, 0, 5, 5)
beginPath(); arc(50, 50, 10, 0, 2 * Math.PI); fill()
globalAlpha = 0.5; fillStyle = 'white'; fillRect(0, 0, 1, 1)";
        execute_annotation(script, &mut rec, 1.0, 200.0, 100.0).unwrap();
        assert_eq!(rec.calls[0], "stroke 2 4");
        assert_eq!(rec.calls[1], "strokeRect 0 0 5 5 lw=4");
        assert_eq!(rec.calls[2], "strokeRect 0 0 5 5 lw=1");
        assert_eq!(rec.calls[3], "fill 1");
        assert_eq!(rec.calls[4], "fillRect 0 0 1 1 255,255,255,128");
    }

    #[test]
    fn runtime_failure_reports_statement_and_keeps_earlier_drawing() {
        let mut canvas = Canvas::new(10, 10);
        let err = execute_annotation(
            "fillRect(0, 0, 2, 2)\nfillStyle = 'not-a-color'\nfillRect(5, 5, 2, 2)",
            &mut canvas,
            1.0,
            10.0,
            10.0,
        )
        .unwrap_err();
        assert_eq!(
            err,
            AnnotationError::Runtime {
                statement: 2,
                message: "line 2: unrecognized color \"not-a-color\"".into()
            }
        );
        assert_eq!(canvas.pixel(0, 0), Color::BLACK);
        assert_eq!(canvas.pixel(6, 6), Color::WHITE);
    }

    #[test]
    fn host_access_is_not_possible() {
        let mut rec = Recorder::default();
        for script in [
            "document.body.remove()",
            "eval('1')",
            "fetch('http://example.com')",
            "fillRect(w, h, 1, 1)",
            "zoom = 3",
        ] {
            let result = execute_annotation(script, &mut rec, 1.0, 10.0, 10.0);
            assert!(result.is_err(), "{script} should be rejected");
        }
        assert!(rec.calls.is_empty());
    }

    #[test]
    fn arity_and_types_are_checked() {
        let mut rec = Recorder::default();
        assert!(execute_annotation("fillRect(1, 2, 3)", &mut rec, 1.0, 1.0, 1.0).is_err());
        assert!(execute_annotation("fillRect('a', 2, 3, 4)", &mut rec, 1.0, 1.0, 1.0).is_err());
        assert!(execute_annotation("lineWidth = -1", &mut rec, 1.0, 1.0, 1.0).is_err());
        assert!(execute_annotation("fillRect(1 / 0, 0, 1, 1)", &mut rec, 1.0, 1.0, 1.0).is_err());
        assert!(execute_annotation("W(0.5, 1)", &mut rec, 1.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn overflowing_arithmetic_never_reaches_the_surface() {
        let mut rec = Recorder::default();
        for script in [
            "fillRect(1e30 * 1e30, 0, 1, 1)",
            "fillRect(0, 1e30 * 1e30 - 1e30 * 1e30, 1, 1)",
            "arc(0, 0, 1e30 * 1e30, 0, 1)",
            "lineWidth = 1e30 * 1e30",
        ] {
            let result = execute_annotation(script, &mut rec, 1.0, 10.0, 10.0);
            assert!(
                matches!(result, Err(AnnotationError::Runtime { statement: 1, .. })),
                "{script} should fail at runtime"
            );
        }
        assert!(rec.calls.is_empty());
    }

    #[test]
    fn runaway_nesting_is_rejected_not_fatal() {
        let mut canvas = Canvas::new(4, 4);
        let script = format!("lineWidth = {}1", "-".repeat(200_000));
        let err = execute_annotation(&script, &mut canvas, 1.0, 4.0, 4.0).unwrap_err();
        assert!(matches!(err, AnnotationError::Syntax { line: 1, .. }));
        assert_eq!(canvas.pixel(0, 0), Color::WHITE);
    }
}
