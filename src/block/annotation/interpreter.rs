//! Executes parsed annotation statements against a drawing surface

use std::f32::consts::PI;

use crate::block::canvas::{Color, DrawingSurface, SubPath};
use crate::block::error::AnnotationError;

use super::parser::{BinaryOp, Expr, Statement, StatementKind};

/// Upper bound on statements executed per script
pub const MAX_STATEMENTS: usize = 4096;

/// Upper bound on points accumulated in one path
const MAX_PATH_POINTS: usize = 65_536;

/// Segments used to approximate a full circle
const ARC_SEGMENTS: usize = 64;

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Num(f32),
    Str(String),
}

#[derive(Clone, Debug)]
struct DrawState {
    fill: Color,
    stroke: Color,
    line_width: f32,
    alpha: f32,
    font: String,
}

/// Coordinate helpers exposed to scripts as `W(n)` and `H(n)`
#[derive(Clone, Copy, Debug)]
pub struct CoordinateMapper {
    pub dpi: f32,
    /// Visible width in page units
    pub width: f32,
    /// Visible height in page units
    pub height: f32,
}

impl CoordinateMapper {
    /// Fractions in `(0, 1)` scale to pixels; anything else is already pixels
    #[must_use]
    pub fn w(&self, n: f32) -> f32 {
        map_fraction(n, self.dpi, self.width)
    }

    #[must_use]
    pub fn h(&self, n: f32) -> f32 {
        map_fraction(n, self.dpi, self.height)
    }
}

fn map_fraction(n: f32, dpi: f32, dimension: f32) -> f32 {
    if n > 0.0 && n < 1.0 {
        n * dpi * dimension
    } else {
        n
    }
}

pub struct Interpreter<'s> {
    surface: &'s mut dyn DrawingSurface,
    mapper: CoordinateMapper,
    state: DrawState,
    saved: Vec<DrawState>,
    path: Vec<SubPath>,
    points: usize,
}

impl<'s> Interpreter<'s> {
    pub fn new(surface: &'s mut dyn DrawingSurface, mapper: CoordinateMapper) -> Self {
        Self {
            surface,
            mapper,
            state: DrawState {
                fill: Color::BLACK,
                stroke: Color::BLACK,
                line_width: 1.0,
                alpha: 1.0,
                font: format!("{}px sans-serif", 25.0 * mapper.dpi),
            },
            saved: Vec::new(),
            path: Vec::new(),
            points: 0,
        }
    }

    pub fn run(&mut self, statements: &[Statement]) -> Result<(), AnnotationError> {
        if statements.len() > MAX_STATEMENTS {
            return Err(AnnotationError::Runtime {
                statement: MAX_STATEMENTS + 1,
                message: format!("script exceeds {MAX_STATEMENTS} statements"),
            });
        }
        for (index, stmt) in statements.iter().enumerate() {
            self.execute(stmt).map_err(|message| AnnotationError::Runtime {
                statement: index + 1,
                message: format!("line {}: {message}", stmt.line),
            })?;
        }
        Ok(())
    }

    fn execute(&mut self, stmt: &Statement) -> Result<(), String> {
        match &stmt.kind {
            StatementKind::Assign { property, value } => {
                let value = self.eval(value)?;
                self.assign(property, value)
            }
            StatementKind::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, &args)
            }
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Constant(name) => match name.as_str() {
                "PI" | "Math.PI" => Ok(Value::Num(PI)),
                other => Err(format!("`{other}` is not defined")),
            },
            Expr::Neg(inner) => Ok(Value::Num(-self.number(inner)?)),
            Expr::Binary { op, lhs, rhs } => {
                let (a, b) = (self.number(lhs)?, self.number(rhs)?);
                let out = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => {
                        if b == 0.0 {
                            return Err("division by zero".into());
                        }
                        a / b
                    }
                };
                Ok(Value::Num(out))
            }
            Expr::Call { name, args } => {
                let [arg] = args.as_slice() else {
                    return Err(format!("`{name}` takes exactly one argument"));
                };
                let n = self.number(arg)?;
                match name.as_str() {
                    "W" => Ok(Value::Num(self.mapper.w(n))),
                    "H" => Ok(Value::Num(self.mapper.h(n))),
                    other => Err(format!("`{other}` is not a helper")),
                }
            }
        }
    }

    fn number(&self, expr: &Expr) -> Result<f32, String> {
        match self.eval(expr)? {
            Value::Num(n) if n.is_finite() => Ok(n),
            Value::Num(_) => Err("number is not finite".into()),
            Value::Str(s) => Err(format!("expected a number, found \"{s}\"")),
        }
    }

    fn assign(&mut self, property: &str, value: Value) -> Result<(), String> {
        match (property, value) {
            ("fillStyle", Value::Str(css)) => self.state.fill = parse_color(&css)?,
            ("strokeStyle", Value::Str(css)) => self.state.stroke = parse_color(&css)?,
            ("lineWidth", Value::Num(n)) if n > 0.0 && n.is_finite() => self.state.line_width = n,
            ("globalAlpha", Value::Num(n)) if (0.0..=1.0).contains(&n) => self.state.alpha = n,
            ("font", Value::Str(font)) => self.state.font = font,
            (
                "fillStyle" | "strokeStyle" | "lineWidth" | "globalAlpha" | "font",
                value,
            ) => return Err(format!("invalid value {value:?} for `{property}`")),
            (other, _) => return Err(format!("unknown property `{other}`")),
        }
        Ok(())
    }

    fn call(&mut self, name: &str, args: &[Value]) -> Result<(), String> {
        match name {
            "fillRect" => {
                let [x, y, w, h] = numbers::<4>(name, args)?;
                let color = self.fill_color();
                self.surface.fill_rect(x, y, w, h, color);
            }
            "strokeRect" => {
                let [x, y, w, h] = numbers::<4>(name, args)?;
                let color = self.stroke_color();
                self.surface
                    .stroke_rect(x, y, w, h, color, self.state.line_width);
            }
            "clearRect" => {
                let [x, y, w, h] = numbers::<4>(name, args)?;
                self.surface.clear_rect(x, y, w, h);
            }
            "beginPath" => {
                numbers::<0>(name, args)?;
                self.path.clear();
                self.points = 0;
            }
            "moveTo" => {
                let [x, y] = numbers::<2>(name, args)?;
                self.path.push(SubPath::default());
                self.push_point(x, y)?;
            }
            "lineTo" => {
                let [x, y] = numbers::<2>(name, args)?;
                if self.path.is_empty() {
                    self.path.push(SubPath::default());
                }
                self.push_point(x, y)?;
            }
            "closePath" => {
                numbers::<0>(name, args)?;
                if let Some(sub) = self.path.last_mut() {
                    sub.closed = true;
                    let start = sub.points.first().copied();
                    if let Some((x, y)) = start {
                        self.path.push(SubPath::default());
                        self.push_point(x, y)?;
                    }
                }
            }
            "rect" => {
                let [x, y, w, h] = numbers::<4>(name, args)?;
                self.path.push(SubPath {
                    points: vec![(x, y), (x + w, y), (x + w, y + h), (x, y + h)],
                    closed: true,
                });
                self.points += 4;
                self.path.push(SubPath::default());
                self.push_point(x, y)?;
            }
            "arc" => self.arc(args)?,
            "stroke" => {
                numbers::<0>(name, args)?;
                let color = self.stroke_color();
                self.surface
                    .stroke_path(&self.path, color, self.state.line_width);
            }
            "fill" => {
                numbers::<0>(name, args)?;
                let color = self.fill_color();
                self.surface.fill_path(&self.path, color);
            }
            "fillText" => {
                let (Some(Value::Str(text)), [Value::Num(x), Value::Num(y)]) =
                    (args.first(), args.get(1..).unwrap_or_default())
                else {
                    return Err("fillText expects (text, x, y)".into());
                };
                let color = self.fill_color();
                self.surface
                    .fill_text(text, *x, *y, &self.state.font, color);
            }
            "save" => {
                numbers::<0>(name, args)?;
                self.saved.push(self.state.clone());
            }
            "restore" => {
                numbers::<0>(name, args)?;
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
            }
            other => return Err(format!("unknown function `{other}`")),
        }
        Ok(())
    }

    fn arc(&mut self, args: &[Value]) -> Result<(), String> {
        let (cx, cy, r, start, end, ccw) = match args {
            [_, _, _, _, _] => {
                let [cx, cy, r, s, e] = numbers::<5>("arc", args)?;
                (cx, cy, r, s, e, false)
            }
            [head @ .., Value::Num(flag)] if head.len() == 5 => {
                let [cx, cy, r, s, e] = numbers::<5>("arc", head)?;
                (cx, cy, r, s, e, *flag != 0.0)
            }
            _ => return Err("arc expects (x, y, radius, start, end[, anticlockwise])".into()),
        };
        if r < 0.0 {
            return Err("arc radius must not be negative".into());
        }

        let mut sweep = end - start;
        if ccw {
            if sweep > 0.0 {
                sweep = sweep.rem_euclid(2.0 * PI) - 2.0 * PI;
            }
        } else if sweep < 0.0 {
            sweep = sweep.rem_euclid(2.0 * PI);
        }
        sweep = sweep.clamp(-2.0 * PI, 2.0 * PI);

        let steps = ((sweep.abs() / (2.0 * PI)) * ARC_SEGMENTS as f32).ceil().max(1.0) as usize;
        if self.path.is_empty() {
            self.path.push(SubPath::default());
        }
        for i in 0..=steps {
            let angle = start + sweep * (i as f32 / steps as f32);
            self.push_point(cx + r * angle.cos(), cy + r * angle.sin())?;
        }
        Ok(())
    }

    fn push_point(&mut self, x: f32, y: f32) -> Result<(), String> {
        self.points += 1;
        if self.points > MAX_PATH_POINTS {
            return Err(format!("path exceeds {MAX_PATH_POINTS} points"));
        }
        if let Some(sub) = self.path.last_mut() {
            sub.points.push((x, y));
        }
        Ok(())
    }

    fn fill_color(&self) -> Color {
        self.state.fill.with_alpha_factor(self.state.alpha)
    }

    fn stroke_color(&self) -> Color {
        self.state.stroke.with_alpha_factor(self.state.alpha)
    }
}

fn parse_color(css: &str) -> Result<Color, String> {
    Color::parse(css).ok_or_else(|| format!("unrecognized color \"{css}\""))
}

fn numbers<const N: usize>(name: &str, args: &[Value]) -> Result<[f32; N], String> {
    if args.len() != N {
        return Err(format!("`{name}` takes {N} arguments, got {}", args.len()));
    }
    let mut out = [0.0; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        match arg {
            Value::Num(n) if n.is_finite() => *slot = *n,
            Value::Num(_) => return Err(format!("`{name}` got a number that is not finite")),
            Value::Str(s) => return Err(format!("`{name}` expects numbers, got \"{s}\"")),
        }
    }
    Ok(out)
}
