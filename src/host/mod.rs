//! Host process boundary.
//!
//! Everything the remediation core knows about the game server lives
//! behind the traits in this module. The host adapter implements them;
//! [`crate::sim`] provides an in-memory implementation for tests and the
//! soak command.
//!
//! Capability traits are bound per resolved member (see
//! [`crate::resolver`]), so a host whose internal layout changed simply
//! fails to produce a capability and the dependent feature goes inert.

pub mod main_thread;

use std::sync::Arc;

pub use main_thread::{MainLoop, MainThread};

/// Opaque handle to a native mesh allocation owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u64);

/// Opaque token identifying a resolved member inside the host's type layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberToken(pub u64);

/// Errors surfaced by host operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The host object backing a capability no longer exists.
    #[error("host object is gone: {0}")]
    Gone(String),
    /// A host operation failed.
    #[error("host operation failed: {0}")]
    Operation(String),
    /// The host command dispatcher refused a command.
    #[error("host rejected command: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Runtime type information
// ---------------------------------------------------------------------------

/// A single member (method, property or field) of a host type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Member name as the host reports it.
    pub name: String,
    /// Ordered parameter type names. Empty for fields and nullary methods.
    pub parameters: Vec<String>,
    /// Token used to bind a capability to this member.
    pub token: MemberToken,
}

/// Runtime description of a host type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Fully qualified type name.
    pub name: String,
    /// Members declared on the type.
    pub members: Vec<MemberInfo>,
}

/// Lookup into the host's runtime type information.
pub trait TypeCatalog: Send + Sync {
    /// Find a type by name. `None` when the host has no such type.
    fn find_type(&self, name: &str) -> Option<TypeInfo>;
}

// ---------------------------------------------------------------------------
// Mesh resources
// ---------------------------------------------------------------------------

/// Native mesh allocator of the host.
///
/// `is_destroyed` is the only source of truth for liveness.
pub trait MeshStore: Send + Sync {
    /// Whether the allocation behind `mesh` has already been destroyed.
    fn is_destroyed(&self, mesh: MeshHandle) -> bool;
    /// Vertex-equivalent element count of a live mesh.
    fn element_count(&self, mesh: MeshHandle) -> Result<u64, HostError>;
    /// Destroy the native allocation behind `mesh`.
    fn destroy(&self, mesh: MeshHandle) -> Result<(), HostError>;
}

/// A resource-holding field inside a host-owned object.
pub trait MeshSlot: Send + Sync {
    /// Mesh currently reachable from the slot.
    fn current(&self) -> Option<MeshHandle>;
    /// Overwrite the slot. Used by host operations only.
    fn store(&self, mesh: Option<MeshHandle>);
}

/// A host operation that assigns (`Some`) or clears (`None`) a mesh slot.
pub trait SlotOperation: Send + Sync {
    /// Run the operation against `slot`.
    fn invoke(&self, slot: &dyn MeshSlot, incoming: Option<MeshHandle>);
}

// ---------------------------------------------------------------------------
// Pause and autosave state
// ---------------------------------------------------------------------------

/// Host members the pause controls are bound from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseMembers {
    /// Engine pause toggle entry point (notifies peers).
    pub request_pause: MemberToken,
    /// The host's own "last client left" save/pause path.
    pub last_client_left: MemberToken,
    /// Secondary pause flag kept by the network layer.
    pub network_paused: MemberToken,
    /// Periodic autosave timer.
    pub autosave_timer: MemberToken,
}

/// Host-owned pause state and the entry points that mutate it.
///
/// All methods must be called from the host main thread.
pub trait PauseControls: Send + Sync {
    /// Whether the process runs as a dedicated/headless server.
    fn is_server_mode(&self) -> bool;
    /// Number of connected clients.
    fn connected_clients(&self) -> usize;
    /// Engine-level pause flag.
    fn engine_paused(&self) -> bool;
    /// Network-layer pause flag.
    fn network_paused(&self) -> bool;
    /// Write the network-layer flag directly, bypassing toggle notifications.
    fn set_network_paused(&self, paused: bool);
    /// Whether the autosave timer is running.
    fn autosave_running(&self) -> bool;
    /// Start or stop the autosave timer.
    fn set_autosave_running(&self, running: bool) -> Result<(), HostError>;
    /// Invoke the host's "last client left" save-and-pause path.
    fn handle_last_client_left(&self) -> Result<(), HostError>;
    /// Invoke the normal pause toggle, which also notifies connected peers.
    fn request_pause(&self, paused: bool) -> Result<(), HostError>;
}

/// Point-in-time view of the host pause state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseState {
    /// Engine-level pause flag.
    pub engine_loop_paused: bool,
    /// Network-layer pause flag.
    pub network_layer_paused: bool,
    /// Autosave timer state.
    pub autosave_timer_running: bool,
    /// Connected client count.
    pub connected_client_count: usize,
}

impl PauseState {
    /// Read the current state from the host.
    pub fn observe(controls: &dyn PauseControls) -> Self {
        Self {
            engine_loop_paused: controls.engine_paused(),
            network_layer_paused: controls.network_paused(),
            autosave_timer_running: controls.autosave_running(),
            connected_client_count: controls.connected_clients(),
        }
    }

    /// Whether the state satisfies the idle invariant for the given client count.
    pub fn is_converged(&self) -> bool {
        if self.connected_client_count == 0 {
            self.engine_loop_paused == self.network_layer_paused && !self.autosave_timer_running
        } else {
            self.autosave_timer_running
        }
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Entity spawn request as the host describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Entity class name.
    pub entity: String,
    /// Block position of the spawn.
    pub position: [i32; 3],
}

/// The host's entity spawn operation.
pub trait SpawnOperation: Send + Sync {
    /// Spawn an entity. Returns `true` when the entity was created.
    fn spawn(&self, request: &SpawnRequest) -> bool;
}

// ---------------------------------------------------------------------------
// Commands and events
// ---------------------------------------------------------------------------

/// The host's console command dispatcher.
pub trait CommandDispatcher: Send + Sync {
    /// Execute a full command line. Returns the host's free-text result.
    fn dispatch(&self, line: &str) -> Result<Option<String>, HostError>;
}

/// Lifecycle events the host emits and the hooks observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
    /// The server process finished booting.
    SessionCreated,
    /// The engine pause flag was set by the host.
    EnginePauseChanged {
        /// New value of the flag.
        paused: bool,
    },
    /// A client finished connecting.
    ClientConnected,
    /// A client disconnected.
    ClientDisconnected,
}

impl HostEvent {
    /// Event kind without payload, used as an intercept table key.
    pub fn kind(self) -> HostEventKind {
        match self {
            Self::SessionCreated => HostEventKind::SessionCreated,
            Self::EnginePauseChanged { .. } => HostEventKind::EnginePauseChanged,
            Self::ClientConnected => HostEventKind::ClientConnected,
            Self::ClientDisconnected => HostEventKind::ClientDisconnected,
        }
    }
}

/// Payload-free [`HostEvent`] discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    /// See [`HostEvent::SessionCreated`].
    SessionCreated,
    /// See [`HostEvent::EnginePauseChanged`].
    EnginePauseChanged,
    /// See [`HostEvent::ClientConnected`].
    ClientConnected,
    /// See [`HostEvent::ClientDisconnected`].
    ClientDisconnected,
}

// ---------------------------------------------------------------------------
// Composition root input
// ---------------------------------------------------------------------------

/// Everything the coordinator needs from the host to bind capabilities.
///
/// Binding methods return `None` when the host cannot provide the
/// capability for the given member; the caller treats that the same as a
/// resolution failure.
pub trait HostBindings: Send + Sync {
    /// Runtime type information.
    fn catalog(&self) -> Arc<dyn TypeCatalog>;
    /// Native mesh allocator.
    fn mesh_store(&self) -> Arc<dyn MeshStore>;
    /// Original slot assign/clear operation for a resolved member.
    fn slot_operation(&self, member: MemberToken) -> Option<Arc<dyn SlotOperation>>;
    /// Original spawn operation for a resolved member.
    fn spawn_operation(&self, member: MemberToken) -> Option<Arc<dyn SpawnOperation>>;
    /// Pause controls bound from resolved members.
    fn pause_controls(&self, members: PauseMembers) -> Option<Arc<dyn PauseControls>>;
    /// Console command dispatcher.
    fn command_dispatcher(&self) -> Arc<dyn CommandDispatcher>;
}
