//! In-memory host used by the soak command and the tests.
//!
//! Reproduces the two host defects: replacing a slot's mesh never destroys
//! the old one, and booting with nobody connected never runs the idle-save
//! path. Events the host would emit are queued in an outbox and delivered
//! with [`SimHost::pump`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::coordinator::{targets, InterceptTable};
use crate::host::{
    CommandDispatcher, HostBindings, HostError, HostEvent, MemberInfo, MemberToken, MeshHandle,
    MeshSlot, MeshStore, PauseControls, PauseMembers, PauseState, SlotOperation, SpawnOperation,
    SpawnRequest, TypeCatalog, TypeInfo,
};
use crate::remediation::ReplacementSite;
use crate::resolver::InterceptTarget;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Slot,
    Spawn,
    Pause,
    Event,
}

#[derive(Debug, Clone, Copy)]
struct SimMesh {
    elements: u64,
    destroyed: bool,
}

#[derive(Debug, Clone, Copy)]
struct SimPause {
    server_mode: bool,
    clients: usize,
    engine_paused: bool,
    network_paused: bool,
    autosave_running: bool,
}

#[derive(Debug)]
struct SimState {
    types: Mutex<BTreeMap<String, TypeInfo>>,
    bindings: Mutex<HashMap<MemberToken, Binding>>,
    meshes: Mutex<HashMap<MeshHandle, SimMesh>>,
    next_mesh: AtomicU64,
    destroy_calls: AtomicU64,
    double_destroys: AtomicU64,
    fail_destroys: AtomicBool,
    pause: Mutex<SimPause>,
    outbox: Mutex<VecDeque<HostEvent>>,
    commands: Mutex<Vec<String>>,
    spawned: AtomicU64,
    toggle_calls: AtomicU64,
    idle_save_calls: AtomicU64,
}

/// Simulated dedicated server.
#[derive(Debug, Clone)]
pub struct SimHost {
    state: Arc<SimState>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    /// A freshly booted dedicated server exposing every known target.
    ///
    /// Starts with no clients, both pause flags clear and autosave running.
    pub fn new() -> Self {
        let host = Self {
            state: Arc::new(SimState {
                types: Mutex::new(BTreeMap::new()),
                bindings: Mutex::new(HashMap::new()),
                meshes: Mutex::new(HashMap::new()),
                next_mesh: AtomicU64::new(1),
                destroy_calls: AtomicU64::new(0),
                double_destroys: AtomicU64::new(0),
                fail_destroys: AtomicBool::new(false),
                pause: Mutex::new(SimPause {
                    server_mode: true,
                    clients: 0,
                    engine_paused: false,
                    network_paused: false,
                    autosave_running: true,
                }),
                outbox: Mutex::new(VecDeque::new()),
                commands: Mutex::new(Vec::new()),
                spawned: AtomicU64::new(0),
                toggle_calls: AtomicU64::new(0),
                idle_save_calls: AtomicU64::new(0),
            }),
        };

        for site in ReplacementSite::ALL {
            host.declare(targets::replacement(site), Binding::Slot);
        }
        for target in targets::PAUSE_EVENTS {
            host.declare(target, Binding::Event);
        }
        for target in [
            targets::REQUEST_PAUSE,
            targets::LAST_CLIENT_LEFT,
            targets::NETWORK_PAUSED,
            targets::AUTOSAVE_TIMER,
        ] {
            host.declare(target, Binding::Pause);
        }
        host.declare(targets::ENTITY_SPAWN, Binding::Spawn);
        // Overload the resolver has to disambiguate by signature.
        host.declare_member("ChunkRenderer", "SetMesh", &["Mesh", "bool"], Binding::Event);
        host
    }

    fn declare(&self, target: InterceptTarget, binding: Binding) {
        let params = target.signature.unwrap_or(&[]);
        self.declare_member(target.owner_type, target.member, params, binding);
    }

    fn declare_member(&self, owner: &str, member: &str, params: &[&str], binding: Binding) {
        let mut bindings = lock(&self.state.bindings);
        let token = MemberToken(u64::try_from(bindings.len()).unwrap_or(u64::MAX).saturating_add(1));
        bindings.insert(token, binding);
        lock(&self.state.types)
            .entry(owner.to_owned())
            .or_insert_with(|| TypeInfo {
                name: owner.to_owned(),
                members: Vec::new(),
            })
            .members
            .push(MemberInfo {
                name: member.to_owned(),
                parameters: params.iter().map(|p| (*p).to_owned()).collect(),
                token,
            });
    }

    /// Remove a member, as if the host's internal API changed.
    pub fn remove_member(&self, owner: &str, member: &str) {
        if let Some(info) = lock(&self.state.types).get_mut(owner) {
            info.members.retain(|m| m.name != member);
        }
    }

    /// Run as a listen server instead of a dedicated one.
    pub fn set_server_mode(&self, server_mode: bool) {
        lock(&self.state.pause).server_mode = server_mode;
    }

    /// Make every destroy call fail.
    pub fn fail_destroys(&self, fail: bool) {
        self.state.fail_destroys.store(fail, Ordering::SeqCst);
    }

    // -- meshes -------------------------------------------------------------

    /// Allocate a live mesh with `elements` vertices.
    pub fn alloc_mesh(&self, elements: u64) -> MeshHandle {
        let handle = MeshHandle(self.state.next_mesh.fetch_add(1, Ordering::SeqCst));
        lock(&self.state.meshes).insert(
            handle,
            SimMesh {
                elements,
                destroyed: false,
            },
        );
        handle
    }

    /// Number of meshes allocated and not yet destroyed.
    pub fn live_meshes(&self) -> usize {
        lock(&self.state.meshes).values().filter(|m| !m.destroyed).count()
    }

    /// Total destroy calls received.
    pub fn destroy_calls(&self) -> u64 {
        self.state.destroy_calls.load(Ordering::SeqCst)
    }

    /// Destroy calls that targeted an already-dead mesh.
    pub fn double_destroys(&self) -> u64 {
        self.state.double_destroys.load(Ordering::SeqCst)
    }

    /// A new empty slot.
    pub fn new_slot(&self) -> Arc<SimSlot> {
        Arc::new(SimSlot::default())
    }

    /// The host's unhooked slot operation: a plain overwrite.
    pub fn original_slot_operation(&self) -> Arc<dyn SlotOperation> {
        Arc::new(SlotWrite)
    }

    /// Run the operation for `site` the way the host would: hooked if installed.
    pub fn apply(
        &self,
        table: &InterceptTable,
        site: ReplacementSite,
        slot: &dyn MeshSlot,
        incoming: Option<MeshHandle>,
    ) {
        let op = table
            .slot_operation(site)
            .unwrap_or_else(|| self.original_slot_operation());
        op.invoke(slot, incoming);
    }

    // -- lifecycle ----------------------------------------------------------

    /// Finish booting; emits [`HostEvent::SessionCreated`].
    pub fn boot(&self) {
        self.emit(HostEvent::SessionCreated);
    }

    /// A client connects.
    pub fn connect_client(&self) {
        {
            let mut pause = lock(&self.state.pause);
            pause.clients = pause.clients.saturating_add(1);
        }
        self.emit(HostEvent::ClientConnected);
    }

    /// A client disconnects; the last one out runs the host's idle-save path.
    pub fn disconnect_client(&self) {
        let (remaining, server_mode) = {
            let mut pause = lock(&self.state.pause);
            pause.clients = pause.clients.saturating_sub(1);
            (pause.clients, pause.server_mode)
        };
        self.emit(HostEvent::ClientDisconnected);
        if remaining == 0 && server_mode {
            let _ = self.handle_last_client_left();
        }
    }

    fn emit(&self, event: HostEvent) {
        lock(&self.state.outbox).push_back(event);
    }

    /// Deliver queued events to the installed post-hooks. Returns the number delivered.
    pub fn pump(&self, table: &InterceptTable) -> usize {
        let mut delivered = 0_usize;
        loop {
            let Some(event) = lock(&self.state.outbox).pop_front() else {
                break;
            };
            table.dispatch(event);
            delivered = delivered.saturating_add(1);
        }
        delivered
    }

    /// Current pause state.
    pub fn pause_state(&self) -> PauseState {
        PauseState::observe(self)
    }

    /// Calls to the normal pause toggle.
    pub fn toggle_calls(&self) -> u64 {
        self.state.toggle_calls.load(Ordering::SeqCst)
    }

    /// Calls to the idle-save path.
    pub fn idle_save_calls(&self) -> u64 {
        self.state.idle_save_calls.load(Ordering::SeqCst)
    }

    /// Entities actually spawned.
    pub fn spawned(&self) -> u64 {
        self.state.spawned.load(Ordering::SeqCst)
    }

    /// The host's unhooked spawn operation.
    pub fn original_spawn_operation(&self) -> Arc<dyn SpawnOperation> {
        Arc::new(Spawner {
            host: self.clone(),
        })
    }

    /// Command lines the dispatcher received.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state.commands).clone()
    }

    fn binding(&self, token: MemberToken) -> Option<Binding> {
        lock(&self.state.bindings).get(&token).copied()
    }
}

/// A mesh slot backed by a mutex.
#[derive(Debug, Default)]
pub struct SimSlot {
    mesh: Mutex<Option<MeshHandle>>,
}

impl MeshSlot for SimSlot {
    fn current(&self) -> Option<MeshHandle> {
        *lock(&self.mesh)
    }

    fn store(&self, mesh: Option<MeshHandle>) {
        *lock(&self.mesh) = mesh;
    }
}

struct SlotWrite;

impl SlotOperation for SlotWrite {
    fn invoke(&self, slot: &dyn MeshSlot, incoming: Option<MeshHandle>) {
        slot.store(incoming);
    }
}

struct Spawner {
    host: SimHost,
}

impl SpawnOperation for Spawner {
    fn spawn(&self, _request: &SpawnRequest) -> bool {
        self.host.state.spawned.fetch_add(1, Ordering::SeqCst);
        true
    }
}

impl TypeCatalog for SimHost {
    fn find_type(&self, name: &str) -> Option<TypeInfo> {
        lock(&self.state.types).get(name).cloned()
    }
}

impl MeshStore for SimHost {
    fn is_destroyed(&self, mesh: MeshHandle) -> bool {
        lock(&self.state.meshes).get(&mesh).map_or(true, |m| m.destroyed)
    }

    fn element_count(&self, mesh: MeshHandle) -> Result<u64, HostError> {
        match lock(&self.state.meshes).get(&mesh) {
            Some(m) if !m.destroyed => Ok(m.elements),
            _ => Err(HostError::Gone(format!("mesh {}", mesh.0))),
        }
    }

    fn destroy(&self, mesh: MeshHandle) -> Result<(), HostError> {
        self.state.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_destroys.load(Ordering::SeqCst) {
            return Err(HostError::Operation("native destroy failed".to_owned()));
        }
        let mut meshes = lock(&self.state.meshes);
        match meshes.get_mut(&mesh) {
            Some(m) if !m.destroyed => {
                m.destroyed = true;
                Ok(())
            }
            _ => {
                self.state.double_destroys.fetch_add(1, Ordering::SeqCst);
                Err(HostError::Gone(format!("mesh {}", mesh.0)))
            }
        }
    }
}

impl PauseControls for SimHost {
    fn is_server_mode(&self) -> bool {
        lock(&self.state.pause).server_mode
    }

    fn connected_clients(&self) -> usize {
        lock(&self.state.pause).clients
    }

    fn engine_paused(&self) -> bool {
        lock(&self.state.pause).engine_paused
    }

    fn network_paused(&self) -> bool {
        lock(&self.state.pause).network_paused
    }

    fn set_network_paused(&self, paused: bool) {
        lock(&self.state.pause).network_paused = paused;
    }

    fn autosave_running(&self) -> bool {
        lock(&self.state.pause).autosave_running
    }

    fn set_autosave_running(&self, running: bool) -> Result<(), HostError> {
        lock(&self.state.pause).autosave_running = running;
        Ok(())
    }

    fn handle_last_client_left(&self) -> Result<(), HostError> {
        self.state.idle_save_calls.fetch_add(1, Ordering::SeqCst);
        let changed = {
            let mut pause = lock(&self.state.pause);
            let changed = !pause.engine_paused;
            // Only the engine flag: the network flag is left stale.
            pause.engine_paused = true;
            changed
        };
        if changed {
            self.emit(HostEvent::EnginePauseChanged { paused: true });
        }
        Ok(())
    }

    fn request_pause(&self, paused: bool) -> Result<(), HostError> {
        self.state.toggle_calls.fetch_add(1, Ordering::SeqCst);
        let changed = {
            let mut pause = lock(&self.state.pause);
            let changed = pause.engine_paused != paused;
            pause.engine_paused = paused;
            pause.network_paused = paused;
            changed
        };
        if changed {
            self.emit(HostEvent::EnginePauseChanged { paused });
        }
        Ok(())
    }
}

impl CommandDispatcher for SimHost {
    fn dispatch(&self, line: &str) -> Result<Option<String>, HostError> {
        if line.starts_with("/fail") {
            return Err(HostError::Rejected(line.to_owned()));
        }
        lock(&self.state.commands).push(line.to_owned());
        Ok(Some(format!("executed {line}")))
    }
}

impl HostBindings for SimHost {
    fn catalog(&self) -> Arc<dyn TypeCatalog> {
        Arc::new(self.clone())
    }

    fn mesh_store(&self) -> Arc<dyn MeshStore> {
        Arc::new(self.clone())
    }

    fn slot_operation(&self, member: MemberToken) -> Option<Arc<dyn SlotOperation>> {
        (self.binding(member) == Some(Binding::Slot)).then(|| self.original_slot_operation())
    }

    fn spawn_operation(&self, member: MemberToken) -> Option<Arc<dyn SpawnOperation>> {
        (self.binding(member) == Some(Binding::Spawn)).then(|| self.original_spawn_operation())
    }

    fn pause_controls(&self, members: PauseMembers) -> Option<Arc<dyn PauseControls>> {
        let all_pause = [
            members.request_pause,
            members.last_client_left,
            members.network_paused,
            members.autosave_timer,
        ]
        .into_iter()
        .all(|token| self.binding(token) == Some(Binding::Pause));
        all_pause.then(|| Arc::new(self.clone()) as Arc<dyn PauseControls>)
    }

    fn command_dispatcher(&self) -> Arc<dyn CommandDispatcher> {
        Arc::new(self.clone())
    }
}
