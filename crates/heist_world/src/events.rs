//! Component change notifications.
//!
//! Every structural mutation of the [`World`] queues one [`ChangeEvent`].
//! The [`ChangeNotifier`] fans the queued events out to handlers registered
//! per [`ChangeKind`], in registration order. A handler that returns an error
//! is logged and skipped; the remaining handlers still receive the event.

use heist_component::{Component, ComponentTypeId, Entity};
use tracing::{debug, warn};

use crate::resources::Resources;
use crate::world::World;

/// Upper bound on flush rounds, so handlers that keep mutating the world in
/// response to their own events cannot spin forever.
pub const MAX_FLUSH_ROUNDS: usize = 16;

/// The kind of structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Components were added to an entity, or the entity was created.
    Added,
    /// Components were removed from an entity, or the entity was removed.
    Removed,
}

/// One batched structural change on one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// The entity that changed.
    pub entity: Entity,
    /// Every component type touched by the mutation.
    pub types: Vec<ComponentTypeId>,
}

impl ChangeEvent {
    /// Returns `true` if the change touched component type `T`.
    #[must_use]
    pub fn contains<T: Component>(&self) -> bool {
        self.types.contains(&ComponentTypeId::of::<T>())
    }
}

/// A change handler. Receives the world and resources so it can react with
/// further reads or mutations.
pub type ChangeHandler =
    Box<dyn FnMut(&mut World, &mut Resources, &ChangeEvent) -> anyhow::Result<()>>;

struct Subscription {
    kind: ChangeKind,
    name: &'static str,
    handler: ChangeHandler,
}

/// Summary of one [`ChangeNotifier::flush`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Events taken from the world.
    pub events: usize,
    /// Handler invocations that returned an error.
    pub failures: usize,
}

/// Dispatch table routing change events to handlers.
#[derive(Default)]
pub struct ChangeNotifier {
    subscriptions: Vec<Subscription>,
}

impl ChangeNotifier {
    /// Create a notifier with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`. `name` identifies the handler
    /// in log output.
    pub fn subscribe<F>(&mut self, kind: ChangeKind, name: &'static str, handler: F)
    where
        F: FnMut(&mut World, &mut Resources, &ChangeEvent) -> anyhow::Result<()> + 'static,
    {
        self.subscriptions.push(Subscription {
            kind,
            name,
            handler: Box::new(handler),
        });
    }

    /// Shorthand for `subscribe(ChangeKind::Added, ..)`.
    pub fn on_added<F>(&mut self, name: &'static str, handler: F)
    where
        F: FnMut(&mut World, &mut Resources, &ChangeEvent) -> anyhow::Result<()> + 'static,
    {
        self.subscribe(ChangeKind::Added, name, handler);
    }

    /// Shorthand for `subscribe(ChangeKind::Removed, ..)`.
    pub fn on_removed<F>(&mut self, name: &'static str, handler: F)
    where
        F: FnMut(&mut World, &mut Resources, &ChangeEvent) -> anyhow::Result<()> + 'static,
    {
        self.subscribe(ChangeKind::Removed, name, handler);
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver one event to every handler of its kind.
    ///
    /// Returns the number of handlers that failed.
    pub fn dispatch(
        &mut self,
        world: &mut World,
        resources: &mut Resources,
        event: &ChangeEvent,
    ) -> usize {
        let mut failures = 0;
        for sub in self
            .subscriptions
            .iter_mut()
            .filter(|sub| sub.kind == event.kind)
        {
            if let Err(err) = (sub.handler)(world, resources, event) {
                failures += 1;
                warn!(
                    handler = sub.name,
                    entity = %event.entity,
                    kind = ?event.kind,
                    error = %err,
                    "change handler failed"
                );
            }
        }
        failures
    }

    /// Drain the world's queued changes and dispatch them.
    ///
    /// Events queued by handlers during the flush are delivered in the same
    /// call, for at most [`MAX_FLUSH_ROUNDS`] rounds.
    pub fn flush(&mut self, world: &mut World, resources: &mut Resources) -> FlushStats {
        let mut stats = FlushStats::default();
        for _ in 0..MAX_FLUSH_ROUNDS {
            let events = world.drain_changes();
            if events.is_empty() {
                return stats;
            }
            stats.events += events.len();
            for event in &events {
                stats.failures += self.dispatch(world, resources, event);
            }
        }

        let pending = world.pending_changes().len();
        if pending > 0 {
            warn!(pending, "change flush round limit reached, deferring events");
        } else {
            debug!(events = stats.events, "change flush complete");
        }
        stats
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.subscriptions.iter().map(|s| (s.kind, s.name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug)]
    struct Diamond;
    impl Component for Diamond {}

    #[derive(Debug)]
    struct Carried;
    impl Component for Carried {}

    #[derive(Debug, Default)]
    struct Log(Vec<String>);

    #[test]
    fn test_handlers_run_in_registration_order() {
        let mut world = World::new();
        let mut resources = Resources::new();
        resources.insert(Log::default());
        let mut notifier = ChangeNotifier::new();

        notifier.on_added("first", |_, res, _| {
            res.fetch_mut::<Log>()?.0.push("first".into());
            Ok(())
        });
        notifier.on_added("second", |_, res, _| {
            res.fetch_mut::<Log>()?.0.push("second".into());
            Ok(())
        });

        world.create_entity((Diamond,));
        let stats = notifier.flush(&mut world, &mut resources);

        assert_eq!(stats, FlushStats { events: 1, failures: 0 });
        let log = resources.get::<Log>().map(|l| l.0.clone()).unwrap_or_default();
        assert_eq!(log, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let mut world = World::new();
        let mut resources = Resources::new();
        let mut notifier = ChangeNotifier::new();
        let seen = Rc::new(RefCell::new(0));

        notifier.on_removed("broken", |_, _, _| anyhow::bail!("boom"));
        let counter = Rc::clone(&seen);
        notifier.on_removed("counter", move |_, _, event| {
            assert!(event.contains::<Diamond>());
            *counter.borrow_mut() += 1;
            Ok(())
        });

        let e = world.create_entity((Diamond,));
        world.remove_entity(e);
        let stats = notifier.flush(&mut world, &mut resources);

        assert_eq!(stats.events, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn test_events_raised_by_handlers_are_delivered() {
        let mut world = World::new();
        let mut resources = Resources::new();
        let mut notifier = ChangeNotifier::new();
        let carried = Rc::new(RefCell::new(Vec::new()));

        // Every new diamond is immediately marked as carried.
        notifier.on_added("carry", |world, _, event| {
            if event.contains::<Diamond>() {
                world.add_components(event.entity, (Carried,))?;
            }
            Ok(())
        });
        let sink = Rc::clone(&carried);
        notifier.on_added("watch", move |_, _, event| {
            if event.contains::<Carried>() {
                sink.borrow_mut().push(event.entity);
            }
            Ok(())
        });

        let e = world.create_entity((Diamond,));
        let stats = notifier.flush(&mut world, &mut resources);

        assert_eq!(stats.events, 2);
        assert_eq!(*carried.borrow(), vec![e]);
        assert!(world.pending_changes().is_empty());
    }

    #[test]
    fn test_kind_filtering() {
        let mut world = World::new();
        let mut resources = Resources::new();
        let mut notifier = ChangeNotifier::new();
        let removed = Rc::new(RefCell::new(0));

        let count = Rc::clone(&removed);
        notifier.subscribe(ChangeKind::Removed, "removed", move |_, _, _| {
            *count.borrow_mut() += 1;
            Ok(())
        });

        world.create_entity((Diamond,));
        notifier.flush(&mut world, &mut resources);
        assert_eq!(*removed.borrow(), 0);
        assert_eq!(notifier.handler_count(), 1);
    }
}
