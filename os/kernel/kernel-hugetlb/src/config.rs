/// Runtime knobs for [`HugeTlb`](crate::HugeTlb).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HugeTlbConfig {
    /// Re-tag moved leaves soft-dirty so checkpoint tooling sees the move.
    pub soft_dirty_on_move: bool,
    /// PUD iterations between cooperative yields in whole-region walks.
    pub resched_every_puds: u32,
}

impl Default for HugeTlbConfig {
    fn default() -> Self {
        Self {
            soft_dirty_on_move: true,
            resched_every_puds: 1,
        }
    }
}

impl HugeTlbConfig {
    #[must_use]
    pub const fn with_soft_dirty_on_move(mut self, enabled: bool) -> Self {
        self.soft_dirty_on_move = enabled;
        self
    }

    /// Zero is treated as one.
    #[must_use]
    pub const fn with_resched_every_puds(mut self, puds: u32) -> Self {
        self.resched_every_puds = puds;
        self
    }

    pub(crate) const fn resched_interval(&self) -> u32 {
        if self.resched_every_puds == 0 {
            1
        } else {
            self.resched_every_puds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_yields_every_pud() {
        let config = HugeTlbConfig::default().with_resched_every_puds(0);
        assert_eq!(config.resched_interval(), 1);
        assert_eq!(config.with_resched_every_puds(4).resched_interval(), 4);
    }
}
