//! Re-alignment of batch responses by echoed `_idx`.
//!
//! Model responses may be reordered, truncated or padded. Every response item
//! is matched back to its input purely by `_idx`, never by position, so the
//! result is the same for any permutation of the response.

use std::collections::HashMap;

/// Response item carrying an echoed batch index
pub trait Indexed {
    fn batch_index(&self) -> Option<usize>;
}

#[derive(Debug)]
pub struct Alignment<P> {
    /// One slot per input position; `None` when no item echoed that index
    pub patches: Vec<Option<P>>,
    /// Input positions with no matching response item
    pub misses: Vec<usize>,
    /// Items with a missing, out-of-range or duplicate `_idx`
    pub ignored: usize,
}

/// Match response items to `batch_len` inputs. On duplicate indexes the first item wins.
pub fn align<P: Indexed>(batch_len: usize, response: Vec<P>) -> Alignment<P> {
    let mut by_index: HashMap<usize, P> = HashMap::with_capacity(response.len());
    let mut ignored = 0;

    for item in response {
        match item.batch_index() {
            Some(idx) if idx < batch_len && !by_index.contains_key(&idx) => {
                by_index.insert(idx, item);
            }
            other => {
                tracing::debug!(idx = ?other, batch_len, "ignoring response item");
                ignored += 1;
            }
        }
    }

    let mut patches = Vec::with_capacity(batch_len);
    let mut misses = Vec::new();
    for idx in 0..batch_len {
        let patch = by_index.remove(&idx);
        if patch.is_none() {
            misses.push(idx);
        }
        patches.push(patch);
    }

    Alignment {
        patches,
        misses,
        ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(Option<usize>, &'static str);

    impl Indexed for Item {
        fn batch_index(&self) -> Option<usize> {
            self.0
        }
    }

    #[test]
    fn test_reordered_response_aligns_by_index() {
        let alignment = align(3, vec![Item(Some(2), "c"), Item(Some(0), "a"), Item(Some(1), "b")]);
        let labels: Vec<_> = alignment.patches.iter().map(|p| p.as_ref().unwrap().1).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
        assert!(alignment.misses.is_empty());
        assert_eq!(alignment.ignored, 0);
    }

    #[test]
    fn test_missing_index_is_reported() {
        let alignment = align(
            5,
            vec![Item(Some(0), "a"), Item(Some(1), "b"), Item(Some(2), "c"), Item(Some(4), "e")],
        );
        assert_eq!(alignment.misses, vec![3]);
        assert!(alignment.patches[3].is_none());
        assert_eq!(alignment.patches[4].as_ref().unwrap().1, "e");
    }

    #[test]
    fn test_out_of_range_and_duplicates_ignored() {
        let alignment = align(
            2,
            vec![
                Item(Some(0), "first"),
                Item(Some(0), "second"),
                Item(Some(7), "extra"),
                Item(None, "no index"),
            ],
        );
        assert_eq!(alignment.patches[0].as_ref().unwrap().1, "first");
        assert_eq!(alignment.misses, vec![1]);
        assert_eq!(alignment.ignored, 3);
    }
}
