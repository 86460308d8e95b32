use std::fmt;

use isfdoc::TextureTarget;

use crate::buffer::Buffer;

/// One texture-target symbol per image slot, in declaration order (image
/// inputs first, then imports). Unbound slots classify as 2D.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputTypeDescriptor(Vec<TextureTarget>);

impl InputTypeDescriptor {
    pub fn classify<'a>(bindings: impl IntoIterator<Item = Option<&'a Buffer>>) -> Self {
        Self(
            bindings
                .into_iter()
                .map(|buffer| buffer.map(Buffer::target).unwrap_or_default())
                .collect(),
        )
    }

    pub fn targets(&self) -> &[TextureTarget] {
        &self.0
    }
}

impl fmt::Display for InputTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for target in &self.0 {
            write!(f, "{}", target.symbol())?;
        }
        Ok(())
    }
}

/// Remembers the descriptor the active program was compiled for.
#[derive(Debug, Default)]
pub struct InputTypeTracker {
    compiled: Option<InputTypeDescriptor>,
}

impl InputTypeTracker {
    /// True when no program exists yet or `current` differs from the one the
    /// program was built against.
    pub fn needs_recompile(&self, current: &InputTypeDescriptor) -> bool {
        self.compiled.as_ref() != Some(current)
    }

    pub fn mark_compiled(&mut self, descriptor: InputTypeDescriptor) {
        self.compiled = Some(descriptor);
    }

    pub fn compiled(&self) -> Option<&InputTypeDescriptor> {
        self.compiled.as_ref()
    }

    pub fn reset(&mut self) {
        self.compiled = None;
    }
}
