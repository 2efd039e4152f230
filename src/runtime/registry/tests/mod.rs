//! 操作注册表单元测试
//!
//! 测试归属判定、跟踪与释放、触发链

use crate::domain::Domain;
use crate::runtime::registry::{OpNode, Registry};
use crate::runtime::scheduler::{OpId, OpKind};

#[cfg(test)]
mod op_node_tests {
    use super::*;

    #[test]
    fn test_op_node_new() {
        let node = OpNode::new(OpId(5), OpKind::Timeout, OpId(2));
        assert_eq!(node.id(), OpId(5));
        assert_eq!(node.kind(), OpKind::Timeout);
        assert_eq!(node.trigger(), OpId(2));
        assert!(node.owner().is_none());
    }

    #[test]
    fn test_op_node_owner() {
        let domain = Domain::new();
        let mut node = OpNode::new(OpId(1), OpKind::Immediate, OpId::ROOT);
        assert!(!node.is_tracked_by(domain.id()));

        assert!(node.set_owner(Some(domain.clone())).is_none());
        assert!(node.is_tracked_by(domain.id()));

        let previous = node.set_owner(None);
        assert_eq!(previous, Some(domain));
    }

    #[test]
    fn test_op_node_saved_slot() {
        let domain = Domain::new();
        let mut node = OpNode::new(OpId(1), OpKind::Immediate, OpId::ROOT);
        assert_eq!(node.take_saved_slot(), None);

        node.save_slot(None);
        assert_eq!(node.take_saved_slot(), Some(None));

        node.save_slot(Some(domain.clone()));
        assert_eq!(node.take_saved_slot(), Some(Some(domain)));
        assert_eq!(node.take_saved_slot(), None);
    }
}

#[cfg(test)]
mod observe_tests {
    use super::*;

    #[test]
    fn test_observe_without_domains() {
        let mut registry = Registry::new();
        let owner = registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, None);
        assert_eq!(owner, None);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.trigger(OpId(1)), Some(OpId::ROOT));
    }

    #[test]
    fn test_observe_ambient_domain() {
        let domain = Domain::create();
        let mut registry = Registry::new();
        let owner = registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, Some(&domain));
        assert_eq!(owner, Some(domain.id()));
        assert!(registry.is_tracked(domain.id(), OpId(1)));
        domain.disable();
    }

    #[test]
    fn test_observe_inherits_from_trigger() {
        let domain = Domain::create();
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, Some(&domain));
        let owner = registry.observe(OpId(2), OpKind::Timeout, OpId(1), None);
        assert_eq!(owner, Some(domain.id()));
        assert_eq!(registry.tracked_by(domain.id()), vec![OpId(1), OpId(2)]);
        domain.disable();
    }

    #[test]
    fn test_observe_ambient_wins_over_trigger() {
        let outer = Domain::create();
        let inner = Domain::create();
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, Some(&outer));
        let owner = registry.observe(OpId(2), OpKind::Immediate, OpId(1), Some(&inner));
        assert_eq!(owner, Some(inner.id()));
        assert!(!registry.is_tracked(outer.id(), OpId(2)));
        outer.disable();
        inner.disable();
    }

    #[test]
    fn test_observe_skips_disabled_domains() {
        let disabled = Domain::new();
        let enabled = Domain::create();
        let mut registry = Registry::new();

        let owner = registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, Some(&disabled));
        assert_eq!(owner, None);

        registry.observe(OpId(2), OpKind::Immediate, OpId::ROOT, Some(&enabled));
        enabled.disable();
        let owner = registry.observe(OpId(3), OpKind::Immediate, OpId(2), None);
        assert_eq!(owner, None);
    }

    #[test]
    fn test_observe_first_call_wins() {
        let first = Domain::create();
        let second = Domain::create();
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, Some(&first));
        let owner = registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, Some(&second));
        assert_eq!(owner, Some(first.id()));
        assert_eq!(registry.len(), 1);
        first.disable();
        second.disable();
    }
}

#[cfg(test)]
mod tracking_tests {
    use super::*;

    #[test]
    fn test_track_refuses_unknown_op() {
        let domain = Domain::new();
        let mut registry = Registry::new();
        assert_eq!(registry.track(&domain, OpId(9)), None);
        assert!(!registry.is_tracked(domain.id(), OpId(9)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_track_known_op() {
        let domain = Domain::new();
        let mut registry = Registry::new();
        registry.observe(OpId(9), OpKind::Timeout, OpId(4), None);
        assert_eq!(registry.track(&domain, OpId(9)), Some(None));
        assert!(registry.is_tracked(domain.id(), OpId(9)));
        assert_eq!(registry.trigger(OpId(9)), Some(OpId(4)));
    }

    #[test]
    fn test_track_replaces_owner() {
        let a = Domain::new();
        let b = Domain::new();
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, None);
        registry.track(&a, OpId(1));
        let previous = registry.track(&b, OpId(1));
        assert_eq!(previous, Some(Some(a.clone())));
        assert!(!registry.is_tracked(a.id(), OpId(1)));
        assert!(registry.is_tracked(b.id(), OpId(1)));
    }

    #[test]
    fn test_untrack_exactly_once() {
        let domain = Domain::new();
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, None);
        registry.track(&domain, OpId(1));

        let node = registry.untrack(OpId(1)).expect("tracked node");
        assert_eq!(node.owner(), Some(&domain));
        assert_eq!(node.kind(), OpKind::Immediate);
        assert!(registry.untrack(OpId(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_keeps_nodes() {
        let a = Domain::new();
        let b = Domain::new();
        let mut registry = Registry::new();
        for op in 1..=3 {
            registry.observe(OpId(op), OpKind::Immediate, OpId::ROOT, None);
        }
        registry.track(&a, OpId(1));
        registry.track(&a, OpId(2));
        registry.track(&b, OpId(3));

        let released = registry.release(a.id());
        assert_eq!(released.len(), 2);
        assert!(registry.tracked_by(a.id()).is_empty());
        assert_eq!(registry.tracked_by(b.id()), vec![OpId(3)]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_clear_returns_nodes() {
        let domain = Domain::new();
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, None);
        registry.track(&domain, OpId(1));
        registry.observe(OpId(2), OpKind::Task, OpId(1), None);
        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_saved_slot_for_unknown_op() {
        let domain = Domain::new();
        let mut registry = Registry::new();
        let returned = registry.save_slot(OpId(4), Some(domain.clone()));
        assert_eq!(returned, Some(Some(domain)));
        assert_eq!(registry.take_saved_slot(OpId(4)), None);
    }
}

#[cfg(test)]
mod lineage_tests {
    use super::*;

    #[test]
    fn test_lineage_nearest_first() {
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, None);
        registry.observe(OpId(2), OpKind::Timeout, OpId(1), None);
        registry.observe(OpId(3), OpKind::Microtask, OpId(2), None);
        assert_eq!(registry.lineage(OpId(3)), vec![OpId(3), OpId(2), OpId(1)]);
    }

    #[test]
    fn test_lineage_stops_at_destroyed_trigger() {
        let mut registry = Registry::new();
        registry.observe(OpId(1), OpKind::Immediate, OpId::ROOT, None);
        registry.observe(OpId(2), OpKind::Immediate, OpId(1), None);
        registry.observe(OpId(3), OpKind::Immediate, OpId(2), None);
        registry.untrack(OpId(2));
        assert_eq!(registry.lineage(OpId(3)), vec![OpId(3)]);
        assert!(registry.lineage(OpId(2)).is_empty());
    }
}

#[cfg(test)]
mod prune_tests {
    use super::*;
    use crate::runtime::registry;

    fn live_nodes() -> usize {
        registry::with(|r| r.len())
    }

    #[test]
    fn test_prune_keeps_nodes_while_observed() {
        let domain = Domain::create();
        let start = live_nodes();
        registry::with(|r| r.observe(OpId::next(), OpKind::Immediate, OpId::ROOT, None));

        registry::prune_unobserved();
        assert_eq!(live_nodes(), start + 1);

        domain.disable();
        assert_eq!(live_nodes(), 0);
    }

    #[test]
    fn test_dropping_last_domain_prunes() {
        let domain = Domain::create();
        registry::with(|r| r.observe(OpId::next(), OpKind::Timeout, OpId::ROOT, None));
        assert!(live_nodes() > 0);

        drop(domain);
        assert_eq!(live_nodes(), 0);
    }
}
