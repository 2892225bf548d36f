//! Network identity of entities.
//!
//! Entity handles are local to one process, so entities shared between
//! server and clients carry a [`NetEntity`] with a session-wide uid. The
//! [`UidRegistry`] resource maps uids to local entities; it follows
//! `NetEntity` being added or removed through change handlers installed by
//! [`install`], and records a [`NetEntityEvent`] for each. The session
//! drains those events every tick.

use std::collections::HashMap;

use heist_component::{Component, Entity};
use heist_world::{ChangeNotifier, Resources, World};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Uids are transmitted as 16-bit values.
pub const UID_LIMIT: u32 = 1 << 16;

/// A network-shared entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetEntity {
    uid: u32,
}

impl NetEntity {
    /// Tag an entity with `uid`.
    ///
    /// # Panics
    ///
    /// Panics if `uid` is not below [`UID_LIMIT`].
    #[must_use]
    pub fn new(uid: u32) -> Self {
        assert!(uid < UID_LIMIT, "net uid {uid} outside 0..{UID_LIMIT}");
        Self { uid }
    }

    #[must_use]
    pub fn uid(self) -> u32 {
        self.uid
    }
}

impl Component for NetEntity {}

/// Marks an entity whose state is pushed to peers every fixed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSynchronized;

impl Component for NetSynchronized {}

/// A network entity appeared or disappeared locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEntityEvent {
    Added { entity: Entity, uid: u32 },
    Removed { entity: Entity, uid: Option<u32> },
}

/// Two-way uid/entity map plus the uid allocator of one session.
///
/// Must be [`reset`](UidRegistry::reset) at the start of every session.
#[derive(Debug, Default)]
pub struct UidRegistry {
    uid_to_entity: HashMap<u32, Entity>,
    entity_to_uid: HashMap<Entity, u32>,
    next_uid: u32,
    events: Vec<NetEntityEvent>,
}

impl UidRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next unused uid.
    ///
    /// # Panics
    ///
    /// Panics once [`UID_LIMIT`] uids were handed out this session.
    pub fn consume_uid(&mut self) -> u32 {
        let uid = self.next_uid;
        assert!(uid < UID_LIMIT, "reached the net uid limit of {UID_LIMIT}");
        self.next_uid += 1;
        uid
    }

    #[must_use]
    pub fn uid_of(&self, entity: Entity) -> Option<u32> {
        self.entity_to_uid.get(&entity).copied()
    }

    #[must_use]
    pub fn entity_of(&self, uid: u32) -> Option<Entity> {
        self.uid_to_entity.get(&uid).copied()
    }

    /// Number of mapped entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entity_to_uid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_to_uid.is_empty()
    }

    /// Forget every mapping and restart uid allocation at zero.
    pub fn reset(&mut self) {
        self.uid_to_entity.clear();
        self.entity_to_uid.clear();
        self.next_uid = 0;
        self.events.clear();
    }

    /// Take the recorded events, oldest first.
    pub fn drain_events(&mut self) -> Vec<NetEntityEvent> {
        std::mem::take(&mut self.events)
    }

    /// Map `uid` to `entity` now instead of at the next change flush, so
    /// handlers running later in the same tick see it as taken.
    pub fn claim(&mut self, entity: Entity, uid: u32) {
        if let Some(old_uid) = self.entity_to_uid.insert(entity, uid) {
            if old_uid != uid {
                self.uid_to_entity.remove(&old_uid);
            }
        }
        if let Some(previous) = self.uid_to_entity.insert(uid, entity) {
            if previous != entity {
                warn!(uid, %previous, %entity, "net uid reassigned");
                self.entity_to_uid.remove(&previous);
            }
        }
    }

    fn link(&mut self, entity: Entity, uid: u32) {
        self.claim(entity, uid);
        self.events.push(NetEntityEvent::Added { entity, uid });
    }

    fn unlink(&mut self, entity: Entity) {
        let uid = self.entity_to_uid.remove(&entity);
        if let Some(uid) = uid {
            self.uid_to_entity.remove(&uid);
        }
        self.events.push(NetEntityEvent::Removed { entity, uid });
    }
}

/// Insert a [`UidRegistry`] resource if missing and subscribe it to
/// `NetEntity` changes.
pub fn install(notifier: &mut ChangeNotifier, resources: &mut Resources) {
    resources.get_or_insert_with(UidRegistry::new);

    notifier.on_added(
        "net_entity_added",
        |world: &mut World, resources: &mut Resources, event| {
            if !event.contains::<NetEntity>() {
                return Ok(());
            }
            // Removed again before the flush; the Removed event follows.
            let Ok(net) = world.get_component::<NetEntity>(event.entity) else {
                return Ok(());
            };
            let uid = net.uid();
            resources.fetch_mut::<UidRegistry>()?.link(event.entity, uid);
            debug!(entity = %event.entity, uid, "net entity linked");
            Ok(())
        },
    );

    notifier.on_removed(
        "net_entity_removed",
        |_: &mut World, resources: &mut Resources, event| {
            if !event.contains::<NetEntity>() {
                return Ok(());
            }
            resources.fetch_mut::<UidRegistry>()?.unlink(event.entity);
            debug!(entity = %event.entity, "net entity unlinked");
            Ok(())
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (World, Resources, ChangeNotifier) {
        let mut resources = Resources::new();
        let mut notifier = ChangeNotifier::new();
        install(&mut notifier, &mut resources);
        (World::new(), resources, notifier)
    }

    fn registry(resources: &mut Resources) -> &mut UidRegistry {
        resources.get_mut::<UidRegistry>().unwrap()
    }

    #[test]
    fn test_consume_uid_counts_up() {
        let mut uids = UidRegistry::new();
        assert_eq!(uids.consume_uid(), 0);
        assert_eq!(uids.consume_uid(), 1);
        uids.reset();
        assert_eq!(uids.consume_uid(), 0);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_uid_out_of_range_panics() {
        let _ = NetEntity::new(UID_LIMIT);
    }

    #[test]
    #[should_panic(expected = "uid limit")]
    fn test_uid_exhaustion_panics() {
        let mut uids = UidRegistry::new();
        for _ in 0..=UID_LIMIT {
            uids.consume_uid();
        }
    }

    #[test]
    fn test_added_net_entity_is_mapped() {
        let (mut world, mut resources, mut notifier) = setup();
        let uid = registry(&mut resources).consume_uid();
        let e = world.create_entity((NetEntity::new(uid), NetSynchronized));
        world.create_entity((NetSynchronized,));
        notifier.flush(&mut world, &mut resources);

        let uids = registry(&mut resources);
        assert_eq!(uids.entity_of(uid), Some(e));
        assert_eq!(uids.uid_of(e), Some(uid));
        assert_eq!(uids.len(), 1);
        assert_eq!(uids.drain_events(), vec![NetEntityEvent::Added { entity: e, uid }]);
    }

    #[test]
    fn test_removed_net_entity_is_unmapped() {
        let (mut world, mut resources, mut notifier) = setup();
        let e = world.create_entity((NetEntity::new(42),));
        notifier.flush(&mut world, &mut resources);
        registry(&mut resources).drain_events();

        world.remove_entity(e);
        notifier.flush(&mut world, &mut resources);

        let uids = registry(&mut resources);
        assert!(uids.entity_of(42).is_none());
        assert!(uids.is_empty());
        assert_eq!(
            uids.drain_events(),
            vec![NetEntityEvent::Removed { entity: e, uid: Some(42) }]
        );
    }

    #[test]
    fn test_removing_component_only_unmaps() {
        let (mut world, mut resources, mut notifier) = setup();
        let e = world.create_entity((NetEntity::new(7), NetSynchronized));
        world.remove_components::<(NetEntity,)>(e).unwrap();
        notifier.flush(&mut world, &mut resources);

        assert!(world.contains_entity(e));
        let uids = registry(&mut resources);
        assert!(uids.uid_of(e).is_none());
        assert_eq!(
            uids.drain_events(),
            vec![NetEntityEvent::Removed { entity: e, uid: None }]
        );
    }

    #[test]
    fn test_claimed_uid_is_visible_before_flush() {
        let (mut world, mut resources, mut notifier) = setup();
        let e = world.create_entity((NetEntity::new(5),));
        registry(&mut resources).claim(e, 5);
        assert_eq!(registry(&mut resources).entity_of(5), Some(e));

        notifier.flush(&mut world, &mut resources);
        let uids = registry(&mut resources);
        assert_eq!(uids.entity_of(5), Some(e));
        assert_eq!(uids.len(), 1);
        assert_eq!(uids.drain_events(), vec![NetEntityEvent::Added { entity: e, uid: 5 }]);
    }

    #[test]
    fn test_claimed_entity_removed_before_flush_is_unmapped() {
        let (mut world, mut resources, mut notifier) = setup();
        let e = world.create_entity((NetEntity::new(6),));
        registry(&mut resources).claim(e, 6);
        world.remove_entity(e);
        notifier.flush(&mut world, &mut resources);

        assert!(registry(&mut resources).entity_of(6).is_none());
        assert!(registry(&mut resources).is_empty());
    }

    #[test]
    fn test_replacing_uid_drops_old_mapping() {
        let (mut world, mut resources, mut notifier) = setup();
        let e = world.create_entity((NetEntity::new(1),));
        notifier.flush(&mut world, &mut resources);
        world.add_components(e, (NetEntity::new(2),)).unwrap();
        notifier.flush(&mut world, &mut resources);

        let uids = registry(&mut resources);
        assert!(uids.entity_of(1).is_none());
        assert_eq!(uids.entity_of(2), Some(e));
    }
}
