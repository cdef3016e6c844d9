//! Render pass reconstruction.
//!
//! Only Vulkan (and D3D12 render pass calls) have explicit render passes. The
//! other APIs bind render targets piecemeal, so each command context owns a
//! [`RenderPassTracker`] that turns those bind calls into begin/finish
//! boundaries:
//!
//! | state | event | result |
//! |-------|-------|--------|
//! | no pass | bind non-empty `A` | begin `A` |
//! | in pass `A` | bind `A` | nothing |
//! | in pass `A` | bind non-empty `B` | finish, begin `B` |
//! | in pass `A` | bind empty set | finish |
//! | in pass `A` | present / submit / destroy | finish |
//!
//! Begin and finish therefore strictly alternate, and every begin is matched
//! by a finish before the next begin.

use bitflags::bitflags;

use crate::handle::ResourceView;

/// Maximum number of simultaneously bound color attachments.
pub const MAX_RENDER_TARGETS: usize = 8;

bitflags! {
    /// Attachment kinds for attachment queries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttachmentType: u32 {
        const COLOR = 0x1;
        const DEPTH = 0x2;
        const STENCIL = 0x4;
    }
}

/// Set of views bound as render pass attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderPassAttachments {
    pub colors: [ResourceView; MAX_RENDER_TARGETS],
    pub depth_stencil: ResourceView,
}

impl RenderPassAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attachments from a slice of color views and an optional depth-stencil view.
    ///
    /// Color views beyond [`MAX_RENDER_TARGETS`] are ignored.
    pub fn from_views(colors: &[ResourceView], depth_stencil: ResourceView) -> Self {
        let mut attachments = Self {
            depth_stencil,
            ..Default::default()
        };
        for (slot, view) in attachments.colors.iter_mut().zip(colors) {
            *slot = *view;
        }
        attachments
    }

    pub fn with_color(mut self, index: usize, view: ResourceView) -> Self {
        if let Some(slot) = self.colors.get_mut(index) {
            *slot = view;
        }
        self
    }

    pub fn with_depth_stencil(mut self, view: ResourceView) -> Self {
        self.depth_stencil = view;
        self
    }

    /// Returns `true` if no attachment is bound.
    pub fn is_empty(&self) -> bool {
        self.depth_stencil.is_null() && self.colors.iter().all(|view| view.is_null())
    }

    /// Number of color slots up to and including the last non-null one.
    pub fn color_count(&self) -> usize {
        self.colors
            .iter()
            .rposition(|view| !view.is_null())
            .map_or(0, |last| last + 1)
    }

    /// Attachment of `ty` at `index`.
    ///
    /// Depth and stencil share the single depth-stencil slot; `index` must be
    /// 0 for them. Out-of-range queries return the null view.
    pub fn get(&self, ty: AttachmentType, index: usize) -> ResourceView {
        if ty.contains(AttachmentType::COLOR) {
            self.colors.get(index).copied().unwrap_or_default()
        } else if ty.intersects(AttachmentType::DEPTH | AttachmentType::STENCIL) && index == 0 {
            self.depth_stencil
        } else {
            ResourceView::NULL
        }
    }

    /// Non-null color views with their slot index.
    pub fn bound_colors(&self) -> impl Iterator<Item = (usize, ResourceView)> + '_ {
        self.colors
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, view)| !view.is_null())
    }
}

/// Boundary produced by a tracker state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTransition {
    None,
    Begin(RenderPassAttachments),
    Finish,
    FinishThenBegin(RenderPassAttachments),
}

impl PassTransition {
    /// Invoke `finish` and `begin` in the order this transition requires.
    pub fn dispatch(
        self,
        mut begin: impl FnMut(&RenderPassAttachments),
        mut finish: impl FnMut(),
    ) {
        match self {
            PassTransition::None => {}
            PassTransition::Begin(attachments) => begin(&attachments),
            PassTransition::Finish => finish(),
            PassTransition::FinishThenBegin(attachments) => {
                finish();
                begin(&attachments);
            }
        }
    }

    pub fn begins(&self) -> bool {
        matches!(self, PassTransition::Begin(_) | PassTransition::FinishThenBegin(_))
    }

    pub fn finishes(&self) -> bool {
        matches!(self, PassTransition::Finish | PassTransition::FinishThenBegin(_))
    }
}

/// Render pass state of one command context.
#[derive(Debug, Clone, Default)]
pub struct RenderPassTracker {
    bound: RenderPassAttachments,
    active: bool,
}

impl RenderPassTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a pass is open.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Attachments of the open pass.
    pub fn current(&self) -> Option<&RenderPassAttachments> {
        self.active.then_some(&self.bound)
    }

    /// Currently bound attachments, whether or not a pass is open.
    pub fn bound(&self) -> &RenderPassAttachments {
        &self.bound
    }

    /// Replace the whole attachment set.
    pub fn bind(&mut self, attachments: RenderPassAttachments) -> PassTransition {
        let transition = match (self.active, attachments.is_empty()) {
            (true, _) if attachments == self.bound => PassTransition::None,
            (true, true) => PassTransition::Finish,
            (true, false) => PassTransition::FinishThenBegin(attachments),
            (false, false) => PassTransition::Begin(attachments),
            (false, true) => PassTransition::None,
        };
        self.bound = attachments;
        self.active = !attachments.is_empty();
        transition
    }

    /// Replace one color attachment, keeping the others.
    pub fn set_color(&mut self, index: usize, view: ResourceView) -> PassTransition {
        let next = self.bound.with_color(index, view);
        self.bind(next)
    }

    /// Replace the depth-stencil attachment, keeping the color attachments.
    pub fn set_depth_stencil(&mut self, view: ResourceView) -> PassTransition {
        let next = self.bound.with_depth_stencil(view);
        self.bind(next)
    }

    /// Close the open pass at a present or submit boundary.
    ///
    /// The bound attachments are remembered so [`resume`](Self::resume) can
    /// reopen the pass with them.
    pub fn end(&mut self) -> PassTransition {
        if std::mem::take(&mut self.active) {
            PassTransition::Finish
        } else {
            PassTransition::None
        }
    }

    /// Reopen a pass with the still-bound attachments after [`end`](Self::end).
    pub fn resume(&mut self) -> PassTransition {
        if self.active || self.bound.is_empty() {
            PassTransition::None
        } else {
            self.active = true;
            PassTransition::Begin(self.bound)
        }
    }

    /// Close the open pass and forget the bound attachments.
    pub fn reset(&mut self) -> PassTransition {
        let transition = self.end();
        self.bound = RenderPassAttachments::default();
        transition
    }

    /// Forget any reference to `view`, closing the pass if it was bound.
    pub fn forget_view(&mut self, view: ResourceView) -> PassTransition {
        if view.is_null() {
            return PassTransition::None;
        }
        let mut next = self.bound;
        for slot in next.colors.iter_mut().filter(|slot| **slot == view) {
            *slot = ResourceView::NULL;
        }
        if next.depth_stencil == view {
            next.depth_stencil = ResourceView::NULL;
        }
        if next == self.bound {
            return PassTransition::None;
        }
        // A pass using a destroyed view cannot continue; finish it and leave
        // the remaining attachments bound without reopening.
        let transition = self.end();
        self.bound = next;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rt(value: u64) -> ResourceView {
        ResourceView(value)
    }

    fn colors(views: &[u64]) -> RenderPassAttachments {
        let views: Vec<ResourceView> = views.iter().copied().map(ResourceView).collect();
        RenderPassAttachments::from_views(&views, ResourceView::NULL)
    }

    #[rstest]
    #[case::first_bind(&[], &[1], "b")]
    #[case::same_set(&[1], &[1], "")]
    #[case::switch(&[1], &[2], "fb")]
    #[case::added_target(&[1], &[1, 2], "fb")]
    #[case::cleared(&[1], &[], "f")]
    #[case::nothing_bound(&[], &[], "")]
    fn test_bind_transition(#[case] before: &[u64], #[case] after: &[u64], #[case] expected: &str) {
        let mut tracker = RenderPassTracker::new();
        tracker.bind(colors(before));
        let transition = tracker.bind(colors(after));
        let mut log = String::new();
        if transition.finishes() {
            log.push('f');
        }
        if transition.begins() {
            log.push('b');
        }
        assert_eq!(log, expected);
        assert_eq!(tracker.is_active(), !after.is_empty());
    }

    #[test]
    fn test_same_set_twice_begins_once() {
        let mut tracker = RenderPassTracker::new();
        let a = RenderPassAttachments::new().with_color(0, rt(1));
        assert_eq!(tracker.bind(a), PassTransition::Begin(a));
        assert_eq!(tracker.bind(a), PassTransition::None);
        assert!(tracker.is_active());
    }

    #[test]
    fn test_switch_finishes_then_begins() {
        let mut tracker = RenderPassTracker::new();
        let a = RenderPassAttachments::new().with_color(0, rt(1));
        let b = RenderPassAttachments::new().with_color(0, rt(2));
        tracker.bind(a);
        assert_eq!(tracker.bind(b), PassTransition::FinishThenBegin(b));
        assert_eq!(tracker.current(), Some(&b));
    }

    #[test]
    fn test_clearing_all_finishes() {
        let mut tracker = RenderPassTracker::new();
        tracker.set_color(0, rt(1));
        assert_eq!(tracker.set_color(0, ResourceView::NULL), PassTransition::Finish);
        assert!(!tracker.is_active());
        assert_eq!(tracker.end(), PassTransition::None);
    }

    #[test]
    fn test_incremental_depth_change() {
        let mut tracker = RenderPassTracker::new();
        tracker.set_color(0, rt(1));
        let transition = tracker.set_depth_stencil(rt(9));
        assert!(transition.finishes() && transition.begins());
        assert_eq!(tracker.bound().depth_stencil, rt(9));
        assert_eq!(tracker.bound().colors[0], rt(1));
    }

    #[test]
    fn test_end_and_resume() {
        let mut tracker = RenderPassTracker::new();
        let a = RenderPassAttachments::new().with_color(0, rt(1));
        tracker.bind(a);
        assert_eq!(tracker.end(), PassTransition::Finish);
        assert_eq!(tracker.resume(), PassTransition::Begin(a));
        assert_eq!(tracker.resume(), PassTransition::None);
    }

    #[test]
    fn test_rebind_after_end_begins() {
        let mut tracker = RenderPassTracker::new();
        let a = RenderPassAttachments::new().with_color(0, rt(1));
        tracker.bind(a);
        tracker.end();
        assert_eq!(tracker.bind(a), PassTransition::Begin(a));
    }

    #[test]
    fn test_begin_finish_alternate() {
        let mut tracker = RenderPassTracker::new();
        let mut log = Vec::new();
        let sets = [
            RenderPassAttachments::new().with_color(0, rt(1)),
            RenderPassAttachments::new().with_color(0, rt(1)),
            RenderPassAttachments::new(),
            RenderPassAttachments::new().with_depth_stencil(rt(3)),
            RenderPassAttachments::new().with_color(1, rt(2)),
        ];
        let mut record = |transition: PassTransition| {
            if transition.finishes() {
                log.push('f');
            }
            if transition.begins() {
                log.push('b');
            }
        };
        for set in sets {
            record(tracker.bind(set));
        }
        record(tracker.reset());
        assert_eq!(log.iter().collect::<String>(), "bfbfbf");
    }

    #[test]
    fn test_forget_view_closes_pass() {
        let mut tracker = RenderPassTracker::new();
        tracker.bind(RenderPassAttachments::from_views(&[rt(1), rt(2)], rt(3)));
        assert_eq!(tracker.forget_view(rt(2)), PassTransition::Finish);
        assert_eq!(tracker.bound().colors[1], ResourceView::NULL);
        assert_eq!(tracker.forget_view(rt(7)), PassTransition::None);
    }

    #[test]
    fn test_attachment_queries() {
        let attachments = RenderPassAttachments::from_views(&[rt(1), ResourceView::NULL, rt(3)], rt(4));
        assert_eq!(attachments.color_count(), 3);
        assert_eq!(attachments.get(AttachmentType::COLOR, 2), rt(3));
        assert_eq!(attachments.get(AttachmentType::DEPTH, 0), rt(4));
        assert_eq!(attachments.get(AttachmentType::STENCIL, 1), ResourceView::NULL);
        assert_eq!(attachments.get(AttachmentType::COLOR, 12), ResourceView::NULL);
        assert_eq!(attachments.bound_colors().count(), 2);
    }
}
