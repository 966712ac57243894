//! Render lifecycle state for one block instance

/// Lifecycle phase of a block instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Attached to nothing yet
    Created,
    /// Waiting for visibility or the fallback timer
    Pending,
    /// Cleared to render, render not yet started
    Visible,
    Rendering,
    Rendered,
    Errored,
    /// Terminal
    Destroyed,
}

/// Render lifecycle of one block instance
#[derive(Clone, Debug)]
pub struct RenderState {
    phase: Phase,

    /// Bumped whenever in-flight work must be discarded
    generation: u64,

    /// A source change arrived while rendering
    rerender_pending: bool,

    /// Defer the first render until the block is visible
    lazy_load: bool,
}

impl RenderState {
    #[must_use]
    pub fn new(lazy_load: bool) -> Self {
        Self {
            phase: Phase::Created,
            generation: 0,
            rerender_pending: false,
            lazy_load,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn rerender_pending(&self) -> bool {
        self.rerender_pending
    }

    /// True when results tagged with `generation` may still reach the host
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.phase != Phase::Destroyed && self.generation == generation
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        if self.phase == Phase::Destroyed {
            return vec![];
        }

        match cmd {
            Command::Attach { visible } => {
                if self.phase != Phase::Created {
                    return vec![];
                }
                if !self.lazy_load || visible {
                    self.phase = Phase::Visible;
                    vec![self.start_render()]
                } else {
                    self.phase = Phase::Pending;
                    vec![Effect::ArmLazyTriggers]
                }
            }

            Command::BecameVisible | Command::FallbackFired => {
                if self.phase != Phase::Pending {
                    return vec![];
                }
                self.phase = Phase::Visible;
                vec![Effect::CancelLazyTriggers, self.start_render()]
            }

            Command::SourceChanged => match self.phase {
                Phase::Rendered | Phase::Errored => vec![self.start_render()],
                Phase::Rendering => {
                    self.rerender_pending = true;
                    vec![]
                }
                _ => vec![],
            },

            Command::RenderFinished { generation, ok } => {
                if self.phase != Phase::Rendering || generation != self.generation {
                    return vec![];
                }
                self.phase = if ok { Phase::Rendered } else { Phase::Errored };
                if self.rerender_pending {
                    self.rerender_pending = false;
                    vec![self.start_render()]
                } else {
                    vec![]
                }
            }

            Command::Destroy => {
                self.generation += 1;
                self.phase = Phase::Destroyed;
                self.rerender_pending = false;
                vec![Effect::CancelLazyTriggers, Effect::ReleaseDocument]
            }
        }
    }

    fn start_render(&mut self) -> Effect {
        self.generation += 1;
        self.phase = Phase::Rendering;
        Effect::StartRender {
            generation: self.generation,
        }
    }
}

/// Commands that drive the render lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Instance mounted; `visible` is the viewport state at mount time
    Attach { visible: bool },
    /// Viewport intersection observed
    BecameVisible,
    /// Lazy fallback timer elapsed
    FallbackFired,
    /// The bound file changed on disk
    SourceChanged,
    /// A render task completed
    RenderFinished { generation: u64, ok: bool },
    /// Instance unmounted
    Destroy,
}

/// Effects produced by state changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Start the visibility watch and fallback timer
    ArmLazyTriggers,
    /// Drop the visibility watch and fallback timer
    CancelLazyTriggers,
    /// Render all selected pages, tagged with `generation`
    StartRender { generation: u64 },
    /// Close the held document, if any
    ReleaseDocument,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(lazy: bool) -> RenderState {
        let mut state = RenderState::new(lazy);
        let _ = state.apply(Command::Attach { visible: true });
        let generation = state.generation();
        let _ = state.apply(Command::RenderFinished {
            generation,
            ok: true,
        });
        assert_eq!(state.phase(), Phase::Rendered);
        state
    }

    #[test]
    fn eager_attach_renders_immediately() {
        let mut state = RenderState::new(false);
        let effects = state.apply(Command::Attach { visible: false });
        assert_eq!(effects, vec![Effect::StartRender { generation: 1 }]);
        assert_eq!(state.phase(), Phase::Rendering);
    }

    #[test]
    fn lazy_attach_offscreen_arms_triggers() {
        let mut state = RenderState::new(true);
        let effects = state.apply(Command::Attach { visible: false });
        assert_eq!(effects, vec![Effect::ArmLazyTriggers]);
        assert_eq!(state.phase(), Phase::Pending);
    }

    #[test]
    fn lazy_attach_onscreen_renders() {
        let mut state = RenderState::new(true);
        let effects = state.apply(Command::Attach { visible: true });
        assert_eq!(effects, vec![Effect::StartRender { generation: 1 }]);
    }

    #[test]
    fn first_trigger_wins() {
        let mut state = RenderState::new(true);
        let _ = state.apply(Command::Attach { visible: false });

        let effects = state.apply(Command::FallbackFired);
        assert_eq!(
            effects,
            vec![
                Effect::CancelLazyTriggers,
                Effect::StartRender { generation: 1 }
            ]
        );
        assert!(state.apply(Command::BecameVisible).is_empty());
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn source_change_before_render_is_noop() {
        let mut state = RenderState::new(true);
        assert!(state.apply(Command::SourceChanged).is_empty());
        let _ = state.apply(Command::Attach { visible: false });
        assert!(state.apply(Command::SourceChanged).is_empty());
        assert_eq!(state.phase(), Phase::Pending);
        assert_eq!(state.generation(), 0);
    }

    #[test]
    fn source_change_after_render_rerenders_with_new_generation() {
        let mut state = rendered(false);
        let effects = state.apply(Command::SourceChanged);
        assert_eq!(effects, vec![Effect::StartRender { generation: 2 }]);
        assert_eq!(state.phase(), Phase::Rendering);
    }

    #[test]
    fn changes_during_render_coalesce_into_one_rerender() {
        let mut state = RenderState::new(false);
        let _ = state.apply(Command::Attach { visible: true });

        assert!(state.apply(Command::SourceChanged).is_empty());
        assert!(state.apply(Command::SourceChanged).is_empty());
        assert!(state.rerender_pending());

        let effects = state.apply(Command::RenderFinished {
            generation: 1,
            ok: true,
        });
        assert_eq!(effects, vec![Effect::StartRender { generation: 2 }]);
        assert!(!state.rerender_pending());

        let effects = state.apply(Command::RenderFinished {
            generation: 2,
            ok: false,
        });
        assert!(effects.is_empty());
        assert_eq!(state.phase(), Phase::Errored);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut state = rendered(false);
        let _ = state.apply(Command::SourceChanged);
        let effects = state.apply(Command::RenderFinished {
            generation: 1,
            ok: false,
        });
        assert!(effects.is_empty());
        assert_eq!(state.phase(), Phase::Rendering);
        assert!(state.is_current(2));
        assert!(!state.is_current(1));
    }

    #[test]
    fn destroy_invalidates_in_flight_render() {
        let mut state = RenderState::new(false);
        let _ = state.apply(Command::Attach { visible: true });
        let effects = state.apply(Command::Destroy);
        assert_eq!(
            effects,
            vec![Effect::CancelLazyTriggers, Effect::ReleaseDocument]
        );
        assert!(!state.is_current(1));
        assert!(!state.is_current(state.generation()));

        assert!(state.apply(Command::Destroy).is_empty());
        assert!(
            state
                .apply(Command::RenderFinished {
                    generation: 1,
                    ok: true
                })
                .is_empty()
        );
        assert!(state.apply(Command::SourceChanged).is_empty());
        assert_eq!(state.phase(), Phase::Destroyed);
    }
}
