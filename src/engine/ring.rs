//! ### English
//! Role bookkeeping for the fixed pool of render surfaces.
//!
//! The ring only stores indices; the surfaces themselves live in the renderer's slot arena.
//!
//! ### 中文
//! 固定渲染表面池的角色簿记。
//!
//! 环只保存索引；表面本身位于渲染器的槽位数组中。

/// ### English
/// `producing` / `ready` / `presenting` role indices over `len` slots.
///
/// ### 中文
/// 基于 `len` 个槽位的 `producing` / `ready` / `presenting` 角色索引。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceRing {
    len: usize,
    producing: usize,
    ready: Option<usize>,
    presenting: Option<usize>,
    last_published: Option<usize>,
}

impl SurfaceRing {
    pub fn new(len: usize) -> Self {
        assert!((2..=3).contains(&len), "ring needs 2 or 3 surfaces, got {len}");
        Self {
            len,
            producing: 0,
            ready: None,
            presenting: None,
            last_published: None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn producing(&self) -> usize {
        self.producing
    }

    pub fn ready(&self) -> Option<usize> {
        self.ready
    }

    pub fn presenting(&self) -> Option<usize> {
        self.presenting
    }

    /// ### English
    /// Most recently published slot, whether or not it was presented. Never the producer.
    ///
    /// ### 中文
    /// 最近一次发布的槽位（无论是否已呈现）。不会是生产槽位。
    pub fn last_published(&self) -> Option<usize> {
        self.last_published
    }

    /// ### English
    /// Publishes the just-filled `producing` slot as `ready` and picks the next producer.
    /// Returns the published slot.
    ///
    /// A ready frame that was never presented is dropped. With two slots the only candidate may
    /// be the presenting slot; it then loses its role and becomes the producer (strict swap).
    ///
    /// ### 中文
    /// 将刚写完的 `producing` 槽位发布为 `ready`，并选出下一个生产槽位。返回被发布的槽位。
    ///
    /// 从未被呈现的 ready 帧会被丢弃。两槽位时唯一的候选可能是呈现槽位；
    /// 此时它失去呈现角色并成为生产槽位（严格交换）。
    pub fn advance_after_production(&mut self) -> usize {
        let filled = self.producing;
        self.ready = Some(filled);
        self.last_published = Some(filled);

        let next = (1..self.len)
            .map(|step| (filled + step) % self.len)
            .find(|&slot| Some(slot) != self.presenting);
        self.producing = match next {
            Some(slot) => slot,
            None => {
                let reused = (filled + 1) % self.len;
                debug_assert_eq!(self.presenting, Some(reused));
                self.presenting = None;
                reused
            }
        };

        self.check_roles();
        log::trace!(
            "ring advanced: ready={filled} producing={} presenting={:?}",
            self.producing,
            self.presenting
        );
        filled
    }

    /// ### English
    /// Moves `ready` into `presenting` and returns the slot to present. When no new frame is
    /// ready the last presented slot is returned again; `None` means no frame was ever produced.
    ///
    /// ### 中文
    /// 将 `ready` 移入 `presenting` 并返回要呈现的槽位。没有新帧时再次返回上次呈现的槽位；
    /// `None` 表示从未产出过帧。
    pub fn select_for_present(&mut self) -> Option<usize> {
        if let Some(ready) = self.ready.take() {
            self.presenting = Some(ready);
        }
        self.check_roles();
        self.presenting
    }

    /// ### English
    /// Forgets every produced frame (used after surfaces are rebuilt).
    ///
    /// ### 中文
    /// 丢弃所有已产出的帧（表面重建后使用）。
    pub fn reset(&mut self) {
        *self = Self::new(self.len);
    }

    #[inline]
    fn check_roles(&self) {
        debug_assert!(self.producing < self.len);
        debug_assert_ne!(Some(self.producing), self.ready);
        debug_assert_ne!(Some(self.producing), self.presenting);
        debug_assert_ne!(Some(self.producing), self.last_published);
        debug_assert!(self.ready.is_none() || self.ready != self.presenting);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn roles_distinct(ring: &SurfaceRing) -> bool {
        let p = Some(ring.producing());
        p != ring.ready()
            && p != ring.presenting()
            && (ring.ready().is_none() || ring.ready() != ring.presenting())
    }

    #[test]
    fn nothing_to_present_before_first_frame() {
        let mut ring = SurfaceRing::new(2);
        assert_eq!(ring.select_for_present(), None);
        assert_eq!(ring.select_for_present(), None);
    }

    #[test]
    fn two_slots_swap_strictly() {
        let mut ring = SurfaceRing::new(2);
        assert_eq!(ring.advance_after_production(), 0);
        assert_eq!(ring.producing(), 1);
        assert_eq!(ring.select_for_present(), Some(0));

        assert_eq!(ring.advance_after_production(), 1);
        assert_eq!(ring.producing(), 0);
        assert_eq!(ring.presenting(), None);
        assert_eq!(ring.select_for_present(), Some(1));
        assert_eq!(ring.select_for_present(), Some(1));
    }

    #[test]
    fn three_slots_never_touch_presenting() {
        let mut ring = SurfaceRing::new(3);
        ring.advance_after_production();
        let shown = ring.select_for_present().unwrap();

        for _ in 0..10 {
            ring.advance_after_production();
            assert_ne!(ring.producing(), shown);
            assert_eq!(ring.presenting(), Some(shown));
            assert!(roles_distinct(&ring));
        }
    }

    #[test]
    fn roles_stay_distinct_under_mixed_sequences() {
        for len in [2, 3] {
            let mut ring = SurfaceRing::new(len);
            // Deterministic interleaving of production and presentation.
            for step in 0u32..200 {
                if step % 3 != 1 {
                    ring.advance_after_production();
                }
                if step % 2 == 0 {
                    ring.select_for_present();
                }
                assert!(roles_distinct(&ring), "len={len} step={step} ring={ring:?}");
            }
        }
    }

    #[test]
    fn presented_frames_follow_production_order() {
        let mut ring = SurfaceRing::new(3);
        let mut written_by = [0u32; 3];
        let mut last_seen = 0;

        for frame in 1..=50u32 {
            written_by[ring.producing()] = frame;
            ring.advance_after_production();
            if frame % 4 != 0 {
                let slot = ring.select_for_present().unwrap();
                assert!(written_by[slot] >= last_seen);
                assert_eq!(written_by[slot], frame);
                last_seen = written_by[slot];
            }
        }
    }

    #[test]
    fn last_published_trails_the_producer() {
        for len in [2, 3] {
            let mut ring = SurfaceRing::new(len);
            assert_eq!(ring.last_published(), None);
            for step in 0..12 {
                let filled = ring.advance_after_production();
                assert_eq!(ring.last_published(), Some(filled));
                assert_ne!(ring.last_published(), Some(ring.producing()));
                if step % 2 == 0 {
                    ring.select_for_present();
                }
            }
        }
    }

    #[test]
    fn reset_forgets_frames() {
        let mut ring = SurfaceRing::new(3);
        ring.advance_after_production();
        ring.select_for_present();
        ring.reset();
        assert_eq!(ring, SurfaceRing::new(3));
    }
}
