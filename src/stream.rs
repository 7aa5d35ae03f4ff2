use std::collections::VecDeque;

/// A contiguous span of the underlying file: byte offset plus length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    pub offset: u64,
    pub len: u64,
}

/// Ordered runs covering the bytes of one stream, consumed from the
/// front as the stream is read.
#[derive(Debug, Default)]
pub(crate) struct RunList {
    runs: VecDeque<Run>,
}

impl RunList {
    pub fn new() -> RunList {
        RunList::default()
    }

    pub fn with_capacity(capacity: usize) -> RunList {
        RunList {
            runs: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, run: Run) {
        self.runs.push_back(run);
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Total bytes still covered.
    pub fn total(&self) -> u64 {
        self.runs.iter().map(|r| r.len).sum()
    }

    /// Merge adjacent runs that are contiguous in file offset, so one
    /// read covers what the FAT happened to allocate back-to-back.
    /// Idempotent.
    pub fn compress(&mut self) {
        let mut merged: VecDeque<Run> = VecDeque::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            match merged.back_mut() {
                Some(last) if last.offset + last.len == run.offset => last.len += run.len,
                _ => merged.push_back(run),
            }
        }
        self.runs = merged;
    }

    /// Trim from the tail until the total equals `size`. Whole sectors
    /// were pushed while walking the chain; this cuts the slack in the
    /// final sector (and drops any surplus sectors a malformed chain
    /// carried past the declared size).
    pub fn truncate(&mut self, size: u64) {
        let mut total = self.total();
        while total > size {
            let Some(last) = self.runs.back_mut() else {
                break;
            };
            let excess = total - size;
            if last.len > excess {
                last.len -= excess;
                total -= excess;
            } else {
                total -= last.len;
                self.runs.pop_back();
            }
        }
    }

    /// Split off a prefix of total length `min(request, remaining)`.
    /// Returns the popped runs and the number of bytes they cover.
    pub fn pop(&mut self, request: u64) -> (Vec<Run>, u64) {
        let mut popped = Vec::new();
        let mut taken = 0u64;
        while taken < request {
            let Some(mut run) = self.runs.pop_front() else {
                break;
            };
            let want = request - taken;
            if run.len > want {
                self.runs.push_front(Run {
                    offset: run.offset + want,
                    len: run.len - want,
                });
                run.len = want;
                popped.push(run);
                taken += want;
                break;
            }
            taken += run.len;
            popped.push(run);
        }
        (popped, taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_list(spans: &[(u64, u64)]) -> RunList {
        let mut list = RunList::new();
        for &(offset, len) in spans {
            list.push(Run { offset, len });
        }
        list
    }

    fn spans(list: &RunList) -> Vec<(u64, u64)> {
        list.runs.iter().map(|r| (r.offset, r.len)).collect()
    }

    #[test]
    fn compress_merges_fully_contiguous_runs() {
        let mut list = run_list(&[
            (4608, 1024),
            (5632, 1024),
            (6656, 1024),
            (7680, 1024),
            (8704, 1024),
            (9728, 1024),
            (10752, 512),
        ]);
        list.compress();
        assert_eq!(spans(&list), vec![(4608, 6656)]);
    }

    #[test]
    fn compress_merges_partial_runs() {
        let mut list = run_list(&[
            (4608, 1024),
            (6656, 1024),
            (7680, 1024),
            (8704, 1024),
            (10752, 512),
        ]);
        list.compress();
        assert_eq!(spans(&list), vec![(4608, 1024), (6656, 3072), (10752, 512)]);
    }

    #[test]
    fn compress_is_idempotent() {
        let mut once = run_list(&[(0, 512), (512, 512), (2048, 512)]);
        once.compress();
        let after_once = spans(&once);
        once.compress();
        assert_eq!(spans(&once), after_once);
        // and no two adjacent runs are contiguous
        for pair in after_once.windows(2) {
            assert_ne!(pair[0].0 + pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn truncate_cuts_the_tail_to_the_declared_size() {
        let mut list = run_list(&[(512, 512), (1024, 512), (4096, 512)]);
        list.truncate(1100);
        assert_eq!(list.total(), 1100);
        assert_eq!(spans(&list), vec![(512, 512), (1024, 512), (4096, 76)]);
    }

    #[test]
    fn truncate_drops_surplus_runs() {
        let mut list = run_list(&[(512, 512), (1024, 512), (4096, 512)]);
        list.truncate(100);
        assert_eq!(list.total(), 100);
        assert_eq!(spans(&list), vec![(512, 100)]);
    }

    #[test]
    fn pop_splits_a_single_run() {
        let mut list = run_list(&[(50, 500)]);
        let (popped, taken) = list.pop(200);
        assert_eq!(taken, 200);
        assert_eq!(popped, vec![Run { offset: 50, len: 200 }]);
        assert_eq!(spans(&list), vec![(250, 300)]);
    }

    #[test]
    fn pop_spans_two_runs() {
        let mut list = run_list(&[(50, 500), (1000, 600)]);
        let (popped, taken) = list.pop(600);
        assert_eq!(taken, 600);
        assert_eq!(
            popped,
            vec![Run { offset: 50, len: 500 }, Run { offset: 1000, len: 100 }]
        );
        assert_eq!(spans(&list), vec![(1100, 500)]);
    }

    #[test]
    fn pop_past_the_end_returns_the_remainder() {
        let mut list = run_list(&[(50, 120)]);
        let (popped, taken) = list.pop(4096);
        assert_eq!(taken, 120);
        assert_eq!(popped, vec![Run { offset: 50, len: 120 }]);
        assert!(list.is_empty());

        let (popped, taken) = list.pop(4096);
        assert_eq!(taken, 0);
        assert!(popped.is_empty());
    }
}
