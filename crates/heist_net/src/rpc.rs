//! Remote procedure registration, encoding and dispatch.
//!
//! A datagram carries one call:
//!
//! ```text
//! checksum (4, BE) | rpc id (1) | arguments (layout width)
//! ```
//!
//! Procedures are registered under a one-byte [`RpcId`] with either a typed
//! argument tuple ([`RpcRegistry::register`]), a struct-style format string
//! ([`RpcRegistry::register_format`]) or no layout at all
//! ([`RpcRegistry::register_raw`]). Peers must register the same procedures
//! under the same ids.
//!
//! Receiving never fails loudly: [`RpcRegistry::decode_and_dispatch`] drops
//! corrupted, foreign or malformed datagrams and reports what happened as a
//! [`DispatchOutcome`].

use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;

use heist_world::{Resources, World};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::NetError;
use crate::integrity;
use crate::layout::{Layout, WireArgs, WireValue};

/// Number of distinct procedure identifiers.
pub const MAX_PROCEDURES: usize = 256;

/// Default upper bound on the size of a framed datagram.
pub const DEFAULT_MAX_DATAGRAM: usize = 1024;

/// Size of the procedure identifier in the header.
pub const RPC_ID_LEN: usize = 1;

/// Identifier selecting a registered procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RpcId(pub u8);

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u8> for RpcId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

/// What a handler can touch while it runs.
///
/// The caller address is only meaningful for the duration of one dispatch.
#[derive(Debug)]
pub struct RpcContext<'a> {
    /// The simulation's entity store.
    pub world: &'a mut World,
    /// The simulation's shared resources.
    pub resources: &'a mut Resources,
    caller: SocketAddr,
}

impl<'a> RpcContext<'a> {
    /// Build a context for a datagram received from `caller`.
    pub fn new(world: &'a mut World, resources: &'a mut Resources, caller: SocketAddr) -> Self {
        Self {
            world,
            resources,
            caller,
        }
    }

    /// The address the datagram came from.
    #[must_use]
    pub fn caller(&self) -> SocketAddr {
        self.caller
    }
}

type ValuesHandler = Box<dyn FnMut(&mut RpcContext<'_>, &[WireValue]) -> anyhow::Result<()>>;
type RawHandler = Box<dyn FnMut(&mut RpcContext<'_>, &[u8]) -> anyhow::Result<()>>;

enum Body {
    Layout { layout: Layout, handler: ValuesHandler },
    Raw(RawHandler),
}

struct Registration {
    name: &'static str,
    body: Body,
}

/// Typed handle to a registered procedure, used to encode calls.
pub struct Procedure<A> {
    id: RpcId,
    max_datagram: usize,
    _args: PhantomData<fn(A)>,
}

impl<A> Clone for Procedure<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Procedure<A> {}

impl<A> fmt::Debug for Procedure<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("id", &self.id)
            .field("args", &std::any::type_name::<A>())
            .finish()
    }
}

impl<A: WireArgs> Procedure<A> {
    /// The procedure's identifier.
    #[must_use]
    pub fn id(&self) -> RpcId {
        self.id
    }

    /// Encode a framed call datagram.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Oversized`] if the datagram exceeds the registry's
    /// size limit.
    pub fn encode_call(&self, args: &A) -> Result<Vec<u8>, NetError> {
        let mut payload = Vec::with_capacity(RPC_ID_LEN + A::layout().width());
        payload.push(self.id.0);
        A::layout().encode(&args.to_values(), &mut payload)?;
        frame(&payload, self.max_datagram)
    }
}

fn frame(payload: &[u8], limit: usize) -> Result<Vec<u8>, NetError> {
    let size = integrity::CHECKSUM_LEN + payload.len();
    if size > limit {
        return Err(NetError::Oversized { size, limit });
    }
    Ok(integrity::encode(payload))
}

/// Result of handing one datagram to [`RpcRegistry::decode_and_dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and succeeded.
    Dispatched(RpcId),
    /// Checksum mismatch or truncated datagram. Dropped.
    IntegrityFailure,
    /// No procedure under this id. Dropped.
    UnknownProcedure(RpcId),
    /// The arguments did not match the registered layout. Dropped.
    LayoutMismatch(RpcId),
    /// The handler ran and returned an error.
    HandlerFailed(RpcId),
}

impl DispatchOutcome {
    /// Returns `true` if a handler ran successfully.
    #[must_use]
    pub fn is_dispatched(self) -> bool {
        matches!(self, Self::Dispatched(_))
    }
}

/// Procedure table of one simulation.
pub struct RpcRegistry {
    procedures: Vec<Option<Registration>>,
    max_datagram: usize,
}

impl Default for RpcRegistry {
    fn default() -> Self {
        Self::with_max_datagram(DEFAULT_MAX_DATAGRAM)
    }
}

impl RpcRegistry {
    /// Create an empty registry with the default datagram limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry rejecting calls larger than `max_datagram`
    /// bytes once framed.
    #[must_use]
    pub fn with_max_datagram(max_datagram: usize) -> Self {
        Self {
            procedures: std::iter::repeat_with(|| None).take(MAX_PROCEDURES).collect(),
            max_datagram,
        }
    }

    /// The datagram size limit.
    #[must_use]
    pub fn max_datagram(&self) -> usize {
        self.max_datagram
    }

    fn insert(&mut self, id: RpcId, name: &'static str, body: Body) -> Result<(), NetError> {
        let slot = &mut self.procedures[usize::from(id.0)];
        if let Some(existing) = slot.as_ref() {
            warn!(%id, name, existing = existing.name, "procedure id already taken");
            return Err(NetError::DuplicateProcedure(id));
        }
        debug!(%id, name, "procedure registered");
        *slot = Some(Registration { name, body });
        Ok(())
    }

    /// Register a procedure taking the typed arguments `A`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::DuplicateProcedure`] if `id` is taken.
    pub fn register<A, F>(
        &mut self,
        id: RpcId,
        name: &'static str,
        mut handler: F,
    ) -> Result<Procedure<A>, NetError>
    where
        A: WireArgs,
        F: FnMut(&mut RpcContext<'_>, A) -> anyhow::Result<()> + 'static,
    {
        let values_handler: ValuesHandler =
            Box::new(move |ctx: &mut RpcContext<'_>, values: &[WireValue]| {
                let args = A::from_values(values).ok_or_else(|| {
                    anyhow::anyhow!("decoded values do not match {}", std::any::type_name::<A>())
                })?;
                handler(ctx, args)
            });
        self.insert(
            id,
            name,
            Body::Layout {
                layout: A::layout(),
                handler: values_handler,
            },
        )?;
        Ok(Procedure {
            id,
            max_datagram: self.max_datagram,
            _args: PhantomData,
        })
    }

    /// Register a procedure whose layout is given as a format string.
    /// The handler receives the decoded values in layout order.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidFormat`] if `format` does not parse and
    /// [`NetError::DuplicateProcedure`] if `id` is taken.
    pub fn register_format<F>(
        &mut self,
        id: RpcId,
        name: &'static str,
        format: &str,
        handler: F,
    ) -> Result<RpcId, NetError>
    where
        F: FnMut(&mut RpcContext<'_>, &[WireValue]) -> anyhow::Result<()> + 'static,
    {
        let layout = Layout::parse(format)?;
        self.insert(
            id,
            name,
            Body::Layout {
                layout,
                handler: Box::new(handler),
            },
        )?;
        Ok(id)
    }

    /// Register a procedure that parses its own argument bytes.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::DuplicateProcedure`] if `id` is taken.
    pub fn register_raw<F>(
        &mut self,
        id: RpcId,
        name: &'static str,
        handler: F,
    ) -> Result<RpcId, NetError>
    where
        F: FnMut(&mut RpcContext<'_>, &[u8]) -> anyhow::Result<()> + 'static,
    {
        self.insert(id, name, Body::Raw(Box::new(handler)))?;
        Ok(id)
    }

    /// Returns `true` if a procedure is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: RpcId) -> bool {
        self.procedures[usize::from(id.0)].is_some()
    }

    /// The name a procedure was registered with.
    #[must_use]
    pub fn name(&self, id: RpcId) -> Option<&'static str> {
        self.procedures[usize::from(id.0)]
            .as_ref()
            .map(|reg| reg.name)
    }

    /// The argument layout of a procedure. `None` for raw procedures.
    #[must_use]
    pub fn layout(&self, id: RpcId) -> Option<&Layout> {
        match &self.procedures[usize::from(id.0)].as_ref()?.body {
            Body::Layout { layout, .. } => Some(layout),
            Body::Raw(_) => None,
        }
    }

    /// Number of registered procedures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.procedures.iter().filter(|p| p.is_some()).count()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode a call to a procedure with a layout from loose values.
    ///
    /// # Errors
    ///
    /// [`NetError::UnknownProcedure`] if nothing is registered under `id`,
    /// [`NetError::ValueMismatch`] if the values do not fit the layout or
    /// the procedure is raw, [`NetError::Oversized`] past the size limit.
    pub fn encode_values(&self, id: RpcId, values: &[WireValue]) -> Result<Vec<u8>, NetError> {
        let layout = match &self.procedures[usize::from(id.0)] {
            None => return Err(NetError::UnknownProcedure(id)),
            Some(Registration {
                body: Body::Raw(_), ..
            }) => {
                return Err(NetError::ValueMismatch(format!(
                    "procedure {id} takes raw bytes"
                )));
            }
            Some(Registration {
                body: Body::Layout { layout, .. },
                ..
            }) => layout,
        };

        let mut payload = Vec::with_capacity(RPC_ID_LEN + layout.width());
        payload.push(id.0);
        layout.encode(values, &mut payload)?;
        frame(&payload, self.max_datagram)
    }

    /// Encode a call carrying `args` verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Oversized`] past the size limit.
    pub fn encode_raw(&self, id: RpcId, args: &[u8]) -> Result<Vec<u8>, NetError> {
        let mut payload = Vec::with_capacity(RPC_ID_LEN + args.len());
        payload.push(id.0);
        payload.extend_from_slice(args);
        frame(&payload, self.max_datagram)
    }

    /// Verify, decode and dispatch one datagram, reporting why it was
    /// dropped if it was.
    ///
    /// # Errors
    ///
    /// [`NetError::IntegrityFailure`] for a bad checksum or a datagram with
    /// no procedure id, [`NetError::UnknownProcedure`],
    /// [`NetError::LayoutMismatch`], or [`NetError::Handler`] when the
    /// handler itself fails.
    pub fn try_dispatch(
        &mut self,
        ctx: &mut RpcContext<'_>,
        datagram: &[u8],
    ) -> Result<RpcId, NetError> {
        let payload = integrity::decode(datagram)?;
        let (&raw_id, args) = payload.split_first().ok_or(NetError::IntegrityFailure)?;
        let id = RpcId(raw_id);

        let registration = self.procedures[usize::from(raw_id)]
            .as_mut()
            .ok_or(NetError::UnknownProcedure(id))?;

        let result = match &mut registration.body {
            Body::Layout { layout, handler } => {
                let values = layout.decode(args).ok_or(NetError::LayoutMismatch {
                    id,
                    expected: layout.width(),
                    actual: args.len(),
                })?;
                handler(ctx, &values)
            }
            Body::Raw(handler) => handler(ctx, args),
        };
        result.map_err(|error| NetError::Handler { id, error })?;
        Ok(id)
    }

    /// Verify, decode and dispatch one datagram. Never fails: anything that
    /// goes wrong is logged and the datagram is dropped.
    pub fn decode_and_dispatch(
        &mut self,
        ctx: &mut RpcContext<'_>,
        datagram: &[u8],
    ) -> DispatchOutcome {
        let caller = ctx.caller();
        match self.try_dispatch(ctx, datagram) {
            Ok(id) => DispatchOutcome::Dispatched(id),
            Err(NetError::IntegrityFailure) => {
                debug!(%caller, len = datagram.len(), "dropping corrupted datagram");
                DispatchOutcome::IntegrityFailure
            }
            Err(NetError::UnknownProcedure(id)) => {
                debug!(%caller, %id, "dropping call to unknown procedure");
                DispatchOutcome::UnknownProcedure(id)
            }
            Err(NetError::LayoutMismatch {
                id,
                expected,
                actual,
            }) => {
                debug!(%caller, %id, expected, actual, "dropping malformed call");
                DispatchOutcome::LayoutMismatch(id)
            }
            Err(NetError::Handler { id, error }) => {
                warn!(
                    %caller,
                    %id,
                    name = self.name(id).unwrap_or("?"),
                    error = %format!("{error:#}"),
                    "procedure handler failed"
                );
                DispatchOutcome::HandlerFailed(id)
            }
            Err(other) => {
                // try_dispatch produces no other variants
                warn!(%caller, error = %other, "dispatch failed");
                DispatchOutcome::IntegrityFailure
            }
        }
    }
}

impl fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.procedures
                    .iter()
                    .enumerate()
                    .filter_map(|(id, reg)| Some((id, reg.as_ref()?.name))),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use heist_component::Component;

    use super::*;

    #[derive(Debug, Default)]
    struct Received(Vec<u8>);

    #[derive(Debug, PartialEq)]
    struct Alarm(bool);
    impl Component for Alarm {}

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40_000))
    }

    fn dispatch(
        registry: &mut RpcRegistry,
        resources: &mut Resources,
        datagram: &[u8],
    ) -> DispatchOutcome {
        let mut world = World::new();
        let mut ctx = RpcContext::new(&mut world, resources, peer());
        registry.decode_and_dispatch(&mut ctx, datagram)
    }

    fn recording_registry() -> (RpcRegistry, Procedure<(u8,)>) {
        let mut registry = RpcRegistry::new();
        let procedure = registry
            .register(RpcId(7), "record", |ctx: &mut RpcContext<'_>, (value,): (u8,)| {
                ctx.resources.get_or_insert_with(Received::default).0.push(value);
                Ok(())
            })
            .unwrap();
        (registry, procedure)
    }

    #[test]
    fn test_typed_call_reaches_handler() {
        let (mut registry, record) = recording_registry();
        let mut resources = Resources::new();

        let datagram = record.encode_call(&(5,)).unwrap();
        assert_eq!(datagram.len(), 4 + 1 + 1);
        assert_eq!(datagram[4], 7);

        let outcome = dispatch(&mut registry, &mut resources, &datagram);
        assert_eq!(outcome, DispatchOutcome::Dispatched(RpcId(7)));
        assert_eq!(resources.get::<Received>().map(|r| r.0.clone()), Some(vec![5]));
    }

    #[test]
    fn test_corrupted_call_is_skipped() {
        let (mut registry, record) = recording_registry();
        let mut resources = Resources::new();

        let mut datagram = record.encode_call(&(5,)).unwrap();
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;

        let outcome = dispatch(&mut registry, &mut resources, &datagram);
        assert_eq!(outcome, DispatchOutcome::IntegrityFailure);
        assert!(resources.get::<Received>().is_none());
    }

    #[test]
    fn test_unknown_and_malformed_calls_are_dropped() {
        let (mut registry, _) = recording_registry();
        let mut resources = Resources::new();

        let unknown = integrity::encode(&[9, 1]);
        assert_eq!(
            dispatch(&mut registry, &mut resources, &unknown),
            DispatchOutcome::UnknownProcedure(RpcId(9))
        );

        let too_long = integrity::encode(&[7, 1, 2]);
        assert_eq!(
            dispatch(&mut registry, &mut resources, &too_long),
            DispatchOutcome::LayoutMismatch(RpcId(7))
        );

        let no_id = integrity::encode(&[]);
        assert_eq!(
            dispatch(&mut registry, &mut resources, &no_id),
            DispatchOutcome::IntegrityFailure
        );
        assert!(resources.get::<Received>().is_none());
    }

    #[test]
    fn test_try_dispatch_reports_reason() {
        let (mut registry, _) = recording_registry();
        let mut world = World::new();
        let mut resources = Resources::new();
        let mut ctx = RpcContext::new(&mut world, &mut resources, peer());

        let err = registry
            .try_dispatch(&mut ctx, &integrity::encode(&[7]))
            .unwrap_err();
        assert!(matches!(
            err,
            NetError::LayoutMismatch {
                expected: 1,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_handler_error_is_contained() {
        let mut registry = RpcRegistry::new();
        let fail = registry
            .register(RpcId(0), "fail", |_: &mut RpcContext<'_>, _: ()| anyhow::bail!("rejected"))
            .unwrap();
        let mut resources = Resources::new();

        let outcome = dispatch(&mut registry, &mut resources, &fail.encode_call(&()).unwrap());
        assert_eq!(outcome, DispatchOutcome::HandlerFailed(RpcId(0)));
        assert!(!outcome.is_dispatched());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let (mut registry, _) = recording_registry();
        let err = registry
            .register_raw(RpcId(7), "again", |_: &mut RpcContext<'_>, _: &[u8]| Ok(()))
            .unwrap_err();
        assert!(matches!(err, NetError::DuplicateProcedure(RpcId(7))));
        assert_eq!(registry.name(RpcId(7)), Some("record"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_format_registration() {
        let mut registry = RpcRegistry::new();
        let id = registry
            .register_format(
                RpcId(1),
                "pose",
                "4BH2B",
                |ctx: &mut RpcContext<'_>, values: &[WireValue]| {
                    let bytes: Vec<u8> = values
                        .iter()
                        .map(|v| u8::try_from(v.as_i128() % 256).unwrap_or(0))
                        .collect();
                    ctx.resources.insert(Received(bytes));
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(registry.layout(id).map(Layout::width), Some(8));

        let values: Vec<WireValue> = [1, 2, 3, 4, 0x0105, 6, 7]
            .into_iter()
            .map(|v: u16| WireValue::U16(v))
            .collect();
        let datagram = registry.encode_values(id, &values).unwrap();
        assert_eq!(&datagram[4..], &[1, 1, 2, 3, 4, 0x01, 0x05, 6, 7]);

        let mut resources = Resources::new();
        assert!(dispatch(&mut registry, &mut resources, &datagram).is_dispatched());
        assert_eq!(
            resources.get::<Received>().map(|r| r.0.clone()),
            Some(vec![1, 2, 3, 4, 5, 6, 7])
        );
    }

    #[test]
    fn test_invalid_format_is_rejected() {
        let mut registry = RpcRegistry::new();
        let err = registry
            .register_format(RpcId(1), "bad", "4Z", |_: &mut RpcContext<'_>, _: &[WireValue]| {
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, NetError::InvalidFormat { .. }));
        assert!(!registry.contains(RpcId(1)));
    }

    #[test]
    fn test_raw_procedure_gets_bytes() {
        let mut registry = RpcRegistry::new();
        let id = registry
            .register_raw(RpcId(200), "chat", |ctx: &mut RpcContext<'_>, bytes: &[u8]| {
                ctx.resources.insert(Received(bytes.to_vec()));
                Ok(())
            })
            .unwrap();
        assert!(registry.layout(id).is_none());
        assert!(registry.encode_values(id, &[]).is_err());

        let mut resources = Resources::new();
        let datagram = registry.encode_raw(id, b"psst").unwrap();
        assert!(dispatch(&mut registry, &mut resources, &datagram).is_dispatched());
        assert_eq!(
            resources.get::<Received>().map(|r| r.0.clone()),
            Some(b"psst".to_vec())
        );
    }

    #[test]
    fn test_oversized_call_is_rejected() {
        let mut registry = RpcRegistry::with_max_datagram(16);
        let id = registry
            .register_raw(RpcId(3), "blob", |_: &mut RpcContext<'_>, _: &[u8]| Ok(()))
            .unwrap();
        assert!(registry.encode_raw(id, &[0; 11]).is_ok());
        assert!(matches!(
            registry.encode_raw(id, &[0; 12]),
            Err(NetError::Oversized { size: 17, limit: 16 })
        ));
    }

    #[test]
    fn test_handler_sees_caller_and_world() {
        let mut registry = RpcRegistry::new();
        let trip = registry
            .register(RpcId(2), "trip_alarm", |ctx: &mut RpcContext<'_>, (armed,): (bool,)| {
                let caller = ctx.caller();
                ctx.world.create_entity((Alarm(armed),));
                ctx.resources.insert(caller);
                Ok(())
            })
            .unwrap();

        let mut world = World::new();
        let mut resources = Resources::new();
        let mut ctx = RpcContext::new(&mut world, &mut resources, peer());
        let datagram = trip.encode_call(&(true,)).unwrap();
        assert_eq!(registry.try_dispatch(&mut ctx, &datagram).unwrap(), RpcId(2));

        assert_eq!(resources.get::<SocketAddr>(), Some(&peer()));
        let alarms: Vec<bool> = world.query_component::<Alarm>().map(|(_, a)| a.0).collect();
        assert_eq!(alarms, vec![true]);
    }
}
