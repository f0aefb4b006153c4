//! Status - キューの状態スナップショット
//!
//! 3 つの構造は別々に読むので、同時に動いているワーカーがいると
//! 合計が一瞬ずれることがある（目安として使う）。

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub delayed: usize,
    pub processing: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.delayed + self.processing
    }

    pub fn is_idle(&self) -> bool {
        self.total() == 0
    }
}
