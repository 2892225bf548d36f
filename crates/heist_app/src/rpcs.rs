//! Procedures and systems of the heist game.
//!
//! Both sides register the same table so ids line up; each side only ever
//! receives the calls meant for it.

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::{Context, Result, bail, ensure};
use heist_component::{Component, Entity};
use heist_net::{Procedure, RpcContext, RpcId, SequenceFilter, WireValue};
use heist_system::{Connections, NetEntity, NetEvent, NetSynchronized, Outbox, Session, UidRegistry};
use heist_world::{Resources, World};
use tracing::{debug, info, trace, warn};

pub const PING: RpcId = RpcId(1);
pub const PONG: RpcId = RpcId(2);
pub const JOIN: RpcId = RpcId(3);
pub const INPUT: RpcId = RpcId(4);
pub const SPAWNED: RpcId = RpcId(5);

/// Four direction keys, aim angle, two action buttons.
pub const INPUT_FORMAT: &str = "4B H 2B";

/// Longest accepted player name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Ticks between two client pings.
const PING_INTERVAL: u64 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub x: i16,
    pub y: i16,
}

impl Component for Position {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub addr: SocketAddr,
    pub name: String,
}

impl Component for Player {}

/// Latest input received from a player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Input {
    /// Up, down, left, right.
    pub keys: [bool; 4],
    pub aim: u16,
    pub actions: [u8; 2],
}

impl Component for Input {}

impl Input {
    fn from_values(values: &[WireValue]) -> Result<Self> {
        let [up, down, left, right, aim, a, b] = values else {
            bail!("expected 7 input fields, got {}", values.len());
        };
        let byte = |v: &WireValue| u8::try_from(v.as_i128()).context("input field out of range");
        Ok(Self {
            keys: [byte(up)? != 0, byte(down)? != 0, byte(left)? != 0, byte(right)? != 0],
            aim: u16::try_from(aim.as_i128()).context("aim out of range")?,
            actions: [byte(a)?, byte(b)?],
        })
    }

    /// Movement for one tick.
    fn delta(&self) -> (i16, i16) {
        let [up, down, left, right] = self.keys.map(i16::from);
        (right - left, down - up)
    }

    /// The wire values of this input, in [`INPUT_FORMAT`] order.
    #[cfg(test)]
    fn to_values(&self) -> Vec<WireValue> {
        let mut values: Vec<WireValue> =
            self.keys.iter().map(|&k| WireValue::U8(k.into())).collect();
        values.push(WireValue::U16(self.aim));
        values.extend(self.actions.iter().map(|&a| WireValue::U8(a)));
        values
    }
}

/// Player entities by address, on the server.
#[derive(Debug, Default)]
pub struct Players(HashMap<SocketAddr, Entity>);

impl Players {
    #[must_use]
    pub fn get(&self, addr: SocketAddr) -> Option<Entity> {
        self.0.get(&addr).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Handles used to encode the typed calls.
#[derive(Debug, Clone, Copy)]
pub struct Protocol {
    pub ping: Procedure<(u32,)>,
}

/// Register every procedure, the movement system and player cleanup on
/// `session`.
///
/// # Errors
///
/// Fails if an id is already taken.
pub fn register(session: &mut Session) -> Result<Protocol> {
    session.resources_mut().insert(Players::default());
    session.on_net_event("drop_player", drop_player);
    let rpcs = session.rpcs_mut();

    let pong = rpcs.register(PONG, "pong", |ctx: &mut RpcContext<'_>, (seq,): (u32,)| {
        info!(from = %ctx.caller(), seq, "pong");
        Ok(())
    })?;

    let ping = rpcs.register(PING, "ping", move |ctx: &mut RpcContext<'_>, (seq,): (u32,)| {
        let caller = ctx.caller();
        if !ctx.resources.fetch::<Connections>()?.is_connected(caller) {
            debug!(%caller, seq, "ping from unconnected peer");
            return Ok(());
        }
        if !ctx.resources.fetch_mut::<SequenceFilter>()?.accept(caller, seq) {
            debug!(%caller, seq, "duplicate ping");
            return Ok(());
        }
        let reply = pong.encode_call(&(seq,))?;
        ctx.resources.fetch_mut::<Outbox>()?.send_to(caller, reply);
        Ok(())
    })?;

    let spawned = rpcs.register(
        SPAWNED,
        "spawned",
        |ctx: &mut RpcContext<'_>, (uid, x, y): (u32, i16, i16)| {
            let caller = ctx.caller();
            ensure!(
                ctx.resources.fetch::<Connections>()?.is_connected(caller),
                "spawn from unconnected peer {caller}"
            );
            ensure!(uid < heist_system::replication::UID_LIMIT, "uid {uid} out of range");
            let uids = ctx.resources.fetch_mut::<UidRegistry>()?;
            if uids.entity_of(uid).is_some() {
                return Ok(());
            }
            let entity = ctx.world.create_entity((NetEntity::new(uid), Position { x, y }));
            uids.claim(entity, uid);
            info!(%entity, uid, x, y, "remote entity spawned");
            Ok(())
        },
    )?;

    rpcs.register_raw(JOIN, "join", move |ctx: &mut RpcContext<'_>, args: &[u8]| {
        join(ctx, args, spawned)
    })?;

    rpcs.register_format(
        INPUT,
        "input",
        INPUT_FORMAT,
        |ctx: &mut RpcContext<'_>, values: &[WireValue]| {
            let caller = ctx.caller();
            let input = Input::from_values(values)?;
            let entity = ctx
                .resources
                .fetch::<Players>()?
                .get(caller)
                .with_context(|| format!("input from unknown player {caller}"))?;
            *ctx.world.get_component_mut::<Input>(entity)? = input;
            trace!(%entity, keys = ?input.keys, aim = input.aim, actions = ?input.actions, "input");
            Ok(())
        },
    )?;

    session.add_system("move_players", move_players);

    Ok(Protocol { ping })
}

fn join(ctx: &mut RpcContext<'_>, args: &[u8], spawned: Procedure<(u32, i16, i16)>) -> Result<()> {
    ensure!(
        !args.is_empty() && args.len() <= MAX_NAME_LEN,
        "player name must be 1..={MAX_NAME_LEN} bytes, got {}",
        args.len()
    );
    let name = std::str::from_utf8(args).context("player name is not utf-8")?.to_owned();
    let caller = ctx.caller();
    if let Some(entity) = ctx.resources.fetch::<Players>()?.get(caller) {
        debug!(%caller, %entity, "repeated join");
        return Ok(());
    }

    ctx.resources.fetch_mut::<Connections>()?.accept(caller)?;

    let uid = ctx.resources.fetch_mut::<UidRegistry>()?.consume_uid();
    let spawn = Position::default();
    let entity = ctx.world.create_entity((
        NetEntity::new(uid),
        NetSynchronized,
        spawn,
        Input::default(),
        Player { addr: caller, name: name.clone() },
    ));
    let players = ctx.resources.fetch_mut::<Players>()?;
    players.0.insert(caller, entity);
    let count = players.len();

    let announce = spawned.encode_call(&(uid, spawn.x, spawn.y))?;
    ctx.resources.fetch_mut::<Outbox>()?.broadcast(&announce);
    info!(%caller, %entity, uid, name = %name, players = count, "player joined");
    Ok(())
}

/// Despawn the player of a peer that disconnected.
fn drop_player(world: &mut World, resources: &mut Resources, event: &NetEvent) -> Result<()> {
    let &NetEvent::Disconnected { peer, reason } = event else {
        return Ok(());
    };
    let players = resources.fetch_mut::<Players>()?;
    let Some(entity) = players.0.remove(&peer) else {
        return Ok(());
    };
    let count = players.len();
    if let Ok(player) = world.get_component::<Player>(entity) {
        info!(addr = %player.addr, name = %player.name, ?reason, players = count, "player left");
    }
    world.remove_entity(entity);
    Ok(())
}

/// Apply each player's input to their position.
pub fn move_players(world: &mut World, _: &mut Resources) -> Result<()> {
    let moves: Vec<(Entity, (i16, i16))> = world
        .query_components::<(Input, Position)>()
        .map(|(entity, (input, _))| (entity, input.delta()))
        .filter(|(_, delta)| *delta != (0, 0))
        .collect();
    for (entity, (dx, dy)) in moves {
        let position = world.get_component_mut::<Position>(entity)?;
        position.x = position.x.saturating_add(dx);
        position.y = position.y.saturating_add(dy);
    }
    Ok(())
}

/// Make `session` a client of `server`: join once, then ping regularly.
/// Heartbeats keep the link up; losing it is logged.
///
/// # Errors
///
/// Fails if `name` cannot be framed in one datagram.
pub fn connect(
    session: &mut Session,
    protocol: Protocol,
    server: SocketAddr,
    name: &str,
) -> Result<()> {
    let join = session.rpcs().encode_raw(JOIN, name.as_bytes())?;
    let resources = session.resources_mut();
    resources.fetch_mut::<Outbox>()?.send_to(server, join);
    resources.fetch_mut::<Connections>()?.open(server);

    session.on_net_event("server_link", move |_, _, event| {
        match *event {
            NetEvent::Connected(peer) if peer == server => info!(%server, "linked to server"),
            NetEvent::Disconnected { peer, reason } if peer == server => {
                warn!(%server, ?reason, "lost the server");
            }
            _ => {}
        }
        Ok(())
    });

    let mut ticks = 0_u64;
    let mut seq = 0_u32;
    session.add_system("ping_server", move |_, resources| {
        ticks += 1;
        if ticks % PING_INTERVAL == 0 {
            seq = seq.wrapping_add(1);
            let ping = protocol.ping.encode_call(&(seq,))?;
            resources.fetch_mut::<Outbox>()?.send_to(server, ping);
        }
        Ok(())
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use heist_net::DispatchOutcome;
    use heist_system::SessionConfig;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn session_with(config: SessionConfig) -> (Session, Protocol) {
        let mut session = Session::new(config.with_bind_addr(addr(0))).unwrap();
        let protocol = register(&mut session).unwrap();
        (session, protocol)
    }

    fn server() -> (Session, Protocol) {
        session_with(SessionConfig::new("server"))
    }

    fn join_as(session: &mut Session, port: u16, name: &str) -> DispatchOutcome {
        let join = session.rpcs().encode_raw(JOIN, name.as_bytes()).unwrap();
        session.receive(addr(port), &join)
    }

    fn player(session: &Session, port: u16) -> Option<Entity> {
        session.resources().get::<Players>().unwrap().get(addr(port))
    }

    fn connections(session: &Session) -> &Connections {
        session.resources().get::<Connections>().unwrap()
    }

    fn spawned_call(session: &Session, uid: u32, x: i16, y: i16) -> Vec<u8> {
        let values = [WireValue::U32(uid), WireValue::I16(x), WireValue::I16(y)];
        session.rpcs().encode_values(SPAWNED, &values).unwrap()
    }

    fn outgoing_ids(session: &mut Session) -> Vec<(SocketAddr, u8)> {
        session
            .take_outgoing()
            .into_iter()
            .map(|(to, bytes)| (to, heist_net::integrity::decode(&bytes).unwrap()[0]))
            .collect()
    }

    #[test]
    fn test_join_spawns_player_and_announces() {
        let (mut session, _) = server();
        assert!(join_as(&mut session, 4000, "dallas").is_dispatched());
        session.step();

        let entity = player(&session, 4000).unwrap();
        let player = session.world().get_component::<Player>(entity).unwrap();
        assert_eq!(player.name, "dallas");
        assert_eq!(
            session.resources().get::<UidRegistry>().unwrap().entity_of(0),
            Some(entity)
        );
        assert!(connections(&session).is_connected(addr(4000)));
        assert_eq!(outgoing_ids(&mut session), vec![(addr(4000), SPAWNED.0)]);

        // A second join from the same address is ignored.
        assert!(join_as(&mut session, 4000, "dallas").is_dispatched());
        assert_eq!(session.resources().get::<Players>().unwrap().len(), 1);
    }

    #[test]
    fn test_join_rejects_bad_names() {
        let (mut session, _) = server();
        let long = session.rpcs().encode_raw(JOIN, &[b'a'; MAX_NAME_LEN + 1]).unwrap();
        let invalid = session.rpcs().encode_raw(JOIN, &[0xFF, 0xFE]).unwrap();

        assert_eq!(session.receive(addr(1), &long), DispatchOutcome::HandlerFailed(JOIN));
        assert_eq!(session.receive(addr(2), &invalid), DispatchOutcome::HandlerFailed(JOIN));
        assert_eq!(session.world().entity_count(), 0);
        assert!(connections(&session).is_empty());
    }

    #[test]
    fn test_full_server_refuses_join() {
        let (mut session, _) = session_with(SessionConfig::new("full").with_max_peers(1));
        assert!(join_as(&mut session, 1, "hoxton").is_dispatched());
        assert_eq!(join_as(&mut session, 2, "houston"), DispatchOutcome::HandlerFailed(JOIN));

        assert!(player(&session, 2).is_none());
        assert_eq!(session.world().entity_count(), 1);
        assert_eq!(connections(&session).len(), 1);
    }

    #[test]
    fn test_input_moves_player() {
        let (mut session, _) = server();
        join_as(&mut session, 4001, "wolf");

        let input = Input {
            keys: [false, true, false, true],
            aim: 900,
            actions: [1, 0],
        };
        let call = session.rpcs().encode_values(INPUT, &input.to_values()).unwrap();
        assert!(session.receive(addr(4001), &call).is_dispatched());
        session.step();
        session.step();

        let entity = player(&session, 4001).unwrap();
        let stored = session.world().get_components::<(Input, Position)>(entity).unwrap();
        assert_eq!(*stored.0, input);
        assert_eq!(*stored.1, Position { x: 2, y: 2 });
    }

    #[test]
    fn test_input_from_stranger_fails() {
        let (mut session, _) = server();
        let call = session
            .rpcs()
            .encode_values(INPUT, &Input::default().to_values())
            .unwrap();
        assert_eq!(session.receive(addr(9), &call), DispatchOutcome::HandlerFailed(INPUT));
    }

    #[test]
    fn test_ping_answers_connected_peers_once_per_sequence() {
        let (mut session, protocol) = server();
        join_as(&mut session, 4002, "chains");
        session.take_outgoing();

        let ping = protocol.ping.encode_call(&(7,)).unwrap();
        session.receive(addr(4002), &ping);
        session.receive(addr(4002), &ping);
        session.receive(addr(4003), &ping);
        assert_eq!(outgoing_ids(&mut session), vec![(addr(4002), PONG.0)]);

        let filter = session.resources().get::<SequenceFilter>().unwrap();
        assert_eq!(filter.peer_count(), 1);
    }

    #[test]
    fn test_duplicate_spawn_in_one_tick_creates_one_entity() {
        let (mut client, _) = server();
        client
            .resources_mut()
            .get_mut::<Connections>()
            .unwrap()
            .open(addr(7777));
        let call = spawned_call(&client, 12, -3, 4);

        assert!(client.receive(addr(7777), &call).is_dispatched());
        assert!(client.receive(addr(7777), &call).is_dispatched());
        client.step();
        assert!(client.receive(addr(7777), &call).is_dispatched());
        client.step();

        let spawned: Vec<(Entity, u32)> = client
            .world()
            .query_component::<NetEntity>()
            .map(|(entity, net)| (entity, net.uid()))
            .collect();
        assert_eq!(spawned.len(), 1);
        let (entity, uid) = spawned[0];
        assert_eq!(uid, 12);
        assert_eq!(
            client.resources().get::<UidRegistry>().unwrap().entity_of(12),
            Some(entity)
        );
        assert_eq!(
            *client.world().get_component::<Position>(entity).unwrap(),
            Position { x: -3, y: 4 }
        );
    }

    #[test]
    fn test_spawn_from_unconnected_peer_fails() {
        let (mut client, _) = server();
        let call = spawned_call(&client, 1, 0, 0);
        assert_eq!(
            client.receive(addr(6666), &call),
            DispatchOutcome::HandlerFailed(SPAWNED)
        );
        assert_eq!(client.world().entity_count(), 0);
    }

    #[test]
    fn test_disconnect_despawns_player() {
        let (mut session, _) = server();
        join_as(&mut session, 4004, "bain");
        session.step();
        assert!(player(&session, 4004).is_some());

        session
            .resources_mut()
            .get_mut::<Connections>()
            .unwrap()
            .disconnect(addr(4004));
        session.step();

        assert!(player(&session, 4004).is_none());
        assert_eq!(session.resources().get::<Players>().unwrap().len(), 0);
        assert_eq!(session.world().entity_count(), 0);
        assert!(session.resources().get::<UidRegistry>().unwrap().is_empty());
    }

    #[test]
    fn test_connect_joins_then_pings() {
        let (mut client, protocol) = session_with(SessionConfig::new("client"));
        connect(&mut client, protocol, addr(7777), "chains").unwrap();

        assert!(connections(&client).is_connected(addr(7777)));
        assert_eq!(outgoing_ids(&mut client), vec![(addr(7777), JOIN.0)]);
        for _ in 0..PING_INTERVAL {
            client.step();
        }
        assert_eq!(outgoing_ids(&mut client), vec![(addr(7777), PING.0)]);
    }
}
