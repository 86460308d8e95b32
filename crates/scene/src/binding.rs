use std::sync::Arc;

use isfdoc::ShaderDocument;
use parking_lot::Mutex;

/// The active document together with the generation it was published under.
#[derive(Debug, Clone, Default)]
pub struct Bound {
    pub document: Option<Arc<ShaderDocument>>,
    pub generation: u64,
}

/// Publishes the active document. The lock is separate from the render lock
/// and is only held while a handle is swapped or cloned, so queries never
/// wait on a frame in flight.
#[derive(Debug, Default)]
pub struct DocumentSlot {
    inner: Mutex<Bound>,
}

impl DocumentSlot {
    /// Replaces the active document and returns the new generation.
    pub fn swap(&self, document: Option<Arc<ShaderDocument>>) -> u64 {
        let mut bound = self.inner.lock();
        bound.document = document;
        bound.generation += 1;
        bound.generation
    }

    /// Consistent `(document, generation)` pair.
    pub fn current(&self) -> Bound {
        self.inner.lock().clone()
    }

    pub fn document(&self) -> Option<Arc<ShaderDocument>> {
        self.inner.lock().document.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str) -> Arc<ShaderDocument> {
        Arc::new(
            ShaderDocument::parse(name, "/*{}*/ void main() {}", None).expect("parse"),
        )
    }

    #[test]
    fn swap_publishes_document_and_bumps_generation() {
        let slot = DocumentSlot::default();
        assert!(slot.document().is_none());

        let first = slot.swap(Some(doc("first")));
        let second = slot.swap(Some(doc("second")));
        assert!(second > first);

        let bound = slot.current();
        assert_eq!(bound.generation, second);
        assert_eq!(bound.document.as_deref().map(|d| d.name()), Some("second"));

        slot.swap(None);
        assert!(slot.document().is_none());
    }

    #[test]
    fn readers_on_other_threads_see_whole_documents() {
        let slot = Arc::new(DocumentSlot::default());
        slot.swap(Some(doc("a")));
        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for round in 0..100 {
                    let name = if round % 2 == 0 { "b" } else { "a" };
                    slot.swap(Some(doc(name)));
                }
            })
        };
        for _ in 0..100 {
            let name = slot.document().map(|d| d.name().to_string());
            assert!(matches!(name.as_deref(), Some("a") | Some("b")));
        }
        writer.join().expect("writer thread");
    }
}
