//! Typed multi-component queries.
//!
//! A [`Query`] is a tuple of component types. Running it AND-joins the
//! tables of every type: iteration is driven by the smallest table and each
//! candidate is looked up in the others. Queries only borrow the tables
//! immutably, so a query can never observe a half-applied structural change.
//!
//! ```ignore
//! for (entity, (pos, hp)) in world.query_components::<(Position, Health)>() { /* … */ }
//! ```

use crate::component::{Component, ComponentSet};
use crate::entity::Entity;
use crate::table::{ComponentTable, Tables};

/// A tuple of component types that can be fetched together.
///
/// Implemented for tuples of one through eight component types.
pub trait Query: ComponentSet {
    /// The borrowed values yielded per matching entity.
    type Item<'a>;

    /// Borrowed tables for every type of the query.
    type Fetch<'a>: Copy;

    /// Borrow every table. Returns `None` if any table was never created,
    /// in which case nothing can match.
    fn fetch(tables: &Tables) -> Option<Self::Fetch<'_>>;

    /// The entity list of the smallest table, used to drive iteration.
    fn driver<'a>(fetch: Self::Fetch<'a>) -> &'a [Entity];

    /// Fetch the values for `entity`, or `None` if any is missing.
    fn get<'a>(fetch: Self::Fetch<'a>, entity: Entity) -> Option<Self::Item<'a>>;
}

/// Lazy iterator over the results of a [`Query`].
pub struct QueryIter<'a, Q: Query> {
    fetch: Option<Q::Fetch<'a>>,
    candidates: std::slice::Iter<'a, Entity>,
}

impl<'a, Q: Query> QueryIter<'a, Q> {
    /// Start a query over `tables`.
    #[must_use]
    pub fn new(tables: &'a Tables) -> Self {
        let fetch = Q::fetch(tables);
        let candidates = fetch.map(Q::driver).unwrap_or(&[]).iter();
        Self { fetch, candidates }
    }
}

impl<'a, Q: Query> Iterator for QueryIter<'a, Q> {
    type Item = (Entity, Q::Item<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let fetch = self.fetch?;
        for &entity in self.candidates.by_ref() {
            if let Some(item) = Q::get(fetch, entity) {
                return Some((entity, item));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.candidates.len()))
    }
}

macro_rules! impl_query {
    ($($name:ident),+) => {
        #[allow(non_snake_case, unused_assignments)]
        impl<$($name: Component),+> Query for ($($name,)+) {
            type Item<'a> = ($(&'a $name,)+);
            type Fetch<'a> = ($(&'a ComponentTable<$name>,)+);

            fn fetch(tables: &Tables) -> Option<Self::Fetch<'_>> {
                Some(($(tables.get::<$name>()?,)+))
            }

            fn driver<'a>(fetch: Self::Fetch<'a>) -> &'a [Entity] {
                let ($($name,)+) = fetch;
                let mut smallest: &'a [Entity] = &[];
                let mut smallest_len = usize::MAX;
                $(
                    if $name.len() < smallest_len {
                        smallest_len = $name.len();
                        smallest = $name.entities();
                    }
                )+
                smallest
            }

            fn get<'a>(fetch: Self::Fetch<'a>, entity: Entity) -> Option<Self::Item<'a>> {
                let ($($name,)+) = fetch;
                Some(($($name.get(entity)?,)+))
            }
        }
    };
}

impl_query!(A);
impl_query!(A, B);
impl_query!(A, B, C);
impl_query!(A, B, C, D);
impl_query!(A, B, C, D, E);
impl_query!(A, B, C, D, E, F);
impl_query!(A, B, C, D, E, F, G);
impl_query!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position(i32, i32);
    impl Component for Position {}

    #[derive(Debug, PartialEq)]
    struct Loot(u32);
    impl Component for Loot {}

    #[derive(Debug, PartialEq)]
    struct Wanted;
    impl Component for Wanted {}

    fn entity(index: u32) -> Entity {
        Entity::from_raw_parts(index, 0)
    }

    fn populate() -> Tables {
        let mut tables = Tables::new();
        tables.insert(entity(0), Position(0, 0));
        tables.insert(entity(1), Position(1, 1));
        tables.insert(entity(2), Position(2, 2));
        tables.insert(entity(1), Loot(50));
        tables.insert(entity(2), Loot(75));
        tables.insert(entity(3), Loot(99));
        tables
    }

    #[test]
    fn test_and_join_yields_intersection() {
        let tables = populate();
        let found: Vec<(Entity, u32, i32)> = QueryIter::<(Position, Loot)>::new(&tables)
            .map(|(e, (pos, loot))| (e, loot.0, pos.0))
            .collect();
        assert_eq!(found, vec![(entity(1), 50, 1), (entity(2), 75, 2)]);
    }

    #[test]
    fn test_missing_table_yields_nothing() {
        let tables = populate();
        assert_eq!(QueryIter::<(Position, Wanted)>::new(&tables).count(), 0);
    }

    #[test]
    fn test_single_type_query() {
        let tables = populate();
        let loot: Vec<u32> = QueryIter::<(Loot,)>::new(&tables)
            .map(|(_, (l,))| l.0)
            .collect();
        assert_eq!(loot, vec![50, 75, 99]);
    }

    #[test]
    fn test_iteration_order_is_deterministic() {
        let tables = populate();
        let first: Vec<Entity> = QueryIter::<(Loot, Position)>::new(&tables)
            .map(|(e, _)| e)
            .collect();
        let second: Vec<Entity> = QueryIter::<(Loot, Position)>::new(&tables)
            .map(|(e, _)| e)
            .collect();
        assert_eq!(first, second);
    }
}
