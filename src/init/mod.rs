//! Process role resolution and startup
//!
//! [`initialize`] is the single entry point: it resolves the shared objects
//! for one role and hands them back as [`Handles`], which the caller threads
//! through the rest of the program.

pub mod strategy;

use std::{fmt, str::FromStr};

use log::info;

use crate::{
    buffers::PacketPool,
    client::ClientRecord,
    config::DistConfig,
    error::{DistError, Result},
    ports::{PortDriver, PortTable},
    registry::{RegistryConfig, ResourceRegistry, ShmRegistry},
};

pub use strategy::{AttachStrategy, CreateStrategy, InitStrategy};

/// Requested process type, as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessType {
    Primary,
    Secondary,
    /// Secondary if an owner holds or is claiming the namespace, primary otherwise
    #[default]
    Auto,
}

impl ProcessType {
    /// Settle `Auto` by probing the namespace
    pub fn resolve(self, registry: &RegistryConfig) -> ProcessType {
        match self {
            ProcessType::Auto => match ShmRegistry::live_owner(registry) {
                Some(pid) => {
                    info!("Namespace {} owned by pid {}, running as secondary", registry.namespace, pid);
                    ProcessType::Secondary
                }
                None if ShmRegistry::is_claimed(registry).unwrap_or(false) => {
                    info!("Namespace {} is being claimed, running as secondary", registry.namespace);
                    ProcessType::Secondary
                }
                None => ProcessType::Primary,
            },
            other => other,
        }
    }
}

impl FromStr for ProcessType {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(ProcessType::Primary),
            "secondary" => Ok(ProcessType::Secondary),
            "auto" => Ok(ProcessType::Auto),
            other => Err(DistError::invalid_parameter(
                "proc-type",
                format!("'{}' is not one of primary, secondary, auto", other),
            )),
        }
    }
}

/// Role of this process, fixed once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates and publishes every shared object
    Owner,
    /// Resolves shared objects by name and consumes ring `worker_index`
    Attacher { worker_index: usize },
}

impl Role {
    /// Role for a resolved process type
    ///
    /// A secondary needs a worker index; an owner ignores it.
    pub fn from_process_type(process_type: ProcessType, worker_index: Option<usize>) -> Result<Role> {
        match process_type {
            ProcessType::Primary => Ok(Role::Owner),
            ProcessType::Secondary => worker_index
                .map(|worker_index| Role::Attacher { worker_index })
                .ok_or_else(|| {
                    DistError::invalid_parameter("worker-index", "A secondary process needs a worker index")
                }),
            ProcessType::Auto => Err(DistError::invalid_parameter(
                "proc-type",
                "Process type must be resolved before choosing a role",
            )),
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Role::Owner)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Attacher { worker_index } => write!(f, "attacher (worker {})", worker_index),
        }
    }
}

/// Rings held by a role
#[derive(Debug, Clone)]
pub enum Queues {
    /// Every worker ring, indexed by worker
    Owner(Vec<ClientRecord>),
    /// The single ring of this worker
    Worker(ClientRecord),
}

/// Shared objects resolved by [`initialize`]
#[derive(Debug, Clone)]
pub struct Handles {
    pub role: Role,
    pub ports: PortTable,
    pub pool: PacketPool,
    pub queues: Queues,
}

impl Handles {
    /// Worker records the owner distributes to (empty for an attacher)
    pub fn clients(&self) -> &[ClientRecord] {
        match &self.queues {
            Queues::Owner(clients) => clients,
            Queues::Worker(_) => &[],
        }
    }

    /// This worker's record (`None` for the owner)
    pub fn worker(&self) -> Option<&ClientRecord> {
        match &self.queues {
            Queues::Worker(client) => Some(client),
            Queues::Owner(_) => None,
        }
    }
}

/// Create (owner) or resolve (attacher) every shared object
///
/// Any failure is returned as-is; nothing is retried and nothing partially
/// created is handed out.
pub fn initialize(
    role: Role,
    config: &DistConfig,
    registry: &dyn ResourceRegistry,
    driver: &mut dyn PortDriver,
) -> Result<Handles> {
    let strategy = strategy::strategy_for(role);
    info!("Initialising as {}", strategy.role());

    let ports = strategy.port_table(registry, config, driver)?;
    let pool = strategy.buffer_pool(registry, config, &ports)?;
    strategy.bring_up_ports(&ports, &pool, driver, config)?;
    let queues = strategy.queues(registry, config, &ports)?;

    info!(
        "{} ready: {} ports, {} buffers, {} workers",
        role,
        ports.num_ports(),
        pool.capacity(),
        ports.num_workers()
    );

    Ok(Handles {
        role,
        ports,
        pool,
        queues,
    })
}
