//! Address directory shared by every connection.
//!
//! The registry is a fixed table of 256 slots indexed by [`Address`]. Slot 0
//! permanently holds the server's own entry. Client entries keep a weak
//! handle to their connection: the owning session holds the strong handle,
//! so a session that ends leaves behind a dead entry that the next eviction
//! sweep reclaims.
//!
//! Every operation takes the table lock once and never awaits I/O while
//! holding it, so concurrent callers observe a single total order of slot
//! changes.

use std::fmt;
use std::sync::{Arc, Weak};

use notirouter_protocol::{Address, ListingEntry, RegisterOutcome};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Number of slots, one per possible address.
pub const SLOT_COUNT: usize = 256;

/// Connection-side liveness check used by the eviction sweep.
pub trait Liveness: Send + Sync {
    /// Returns false once the connection can no longer be written to.
    fn is_alive(&self) -> bool;
}

/// One occupied slot.
pub struct UserRecord<H> {
    /// Display name.
    pub name: String,
    /// Weak handle to the owning connection; `None` for the server entry.
    pub connection: Option<Weak<H>>,
}

impl<H> UserRecord<H> {
    /// Creates the reserved server record.
    pub fn server(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: None,
        }
    }

    /// Creates a client record bound to `connection`.
    pub fn client(name: impl Into<String>, connection: &Arc<H>) -> Self {
        Self {
            name: name.into(),
            connection: Some(Arc::downgrade(connection)),
        }
    }

    /// Returns the connection if it has not been dropped yet.
    pub fn upgrade(&self) -> Option<Arc<H>> {
        self.connection.as_ref().and_then(Weak::upgrade)
    }

    fn is_held_by(&self, handle: &Arc<H>) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(handle)))
    }
}

impl<H: Liveness> UserRecord<H> {
    /// Records without a connection are static and always live.
    fn is_live(&self) -> bool {
        match &self.connection {
            None => true,
            Some(weak) => weak.upgrade().is_some_and(|handle| handle.is_alive()),
        }
    }
}

impl<H> Clone for UserRecord<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<H> fmt::Debug for UserRecord<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("name", &self.name)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

struct Table<H> {
    slots: Vec<Option<UserRecord<H>>>,
    occupied: usize,
}

impl<H> Table<H> {
    fn slot(&self, address: Address) -> Option<&UserRecord<H>> {
        self.slots[address.index()].as_ref()
    }

    /// Preferred address first, then ascending with wrap-around, never 0.
    fn find_free(&self, preferred: Address) -> Option<Address> {
        if !preferred.is_server() && self.slot(preferred).is_none() {
            return Some(preferred);
        }
        let mut candidate = preferred.next_client();
        for _ in 1..SLOT_COUNT {
            if self.slot(candidate).is_none() {
                return Some(candidate);
            }
            candidate = candidate.next_client();
        }
        None
    }

    fn occupy(&mut self, address: Address, record: UserRecord<H>) {
        let slot = &mut self.slots[address.index()];
        debug_assert!(slot.is_none(), "slot {} double-occupied", address);
        *slot = Some(record);
        self.occupied += 1;
    }

    fn vacate(&mut self, address: Address) -> Option<UserRecord<H>> {
        if address.is_server() {
            return None;
        }
        let record = self.slots[address.index()].take();
        if record.is_some() {
            self.occupied -= 1;
        }
        record
    }

    fn client_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        (1..SLOT_COUNT).filter_map(|index| {
            self.slots[index]
                .as_ref()
                .map(|_| Address::new(index as u8))
        })
    }
}

/// The address directory.
pub struct Registry<H> {
    table: RwLock<Table<H>>,
}

impl<H: Liveness> Registry<H> {
    /// Creates a registry whose slot 0 holds the server entry.
    pub fn new(server_name: impl Into<String>) -> Self {
        let mut slots: Vec<Option<UserRecord<H>>> = (0..SLOT_COUNT).map(|_| None).collect();
        slots[Address::SERVER.index()] = Some(UserRecord::server(server_name));
        Self {
            table: RwLock::new(Table { slots, occupied: 1 }),
        }
    }

    /// Occupies `preferred` if free, otherwise the next free client slot.
    ///
    /// Returns the assigned address and the outcome. When every slot is
    /// taken the table is left unchanged and the outcome is
    /// [`RegisterOutcome::ServerFull`] with [`Address::SERVER`].
    pub async fn add(
        &self,
        preferred: Address,
        record: UserRecord<H>,
    ) -> (Address, RegisterOutcome) {
        let mut table = self.table.write().await;
        let Some(address) = table.find_free(preferred) else {
            warn!(requested = %preferred, name = %record.name, "Registry full");
            return (Address::SERVER, RegisterOutcome::ServerFull);
        };

        debug!(address = %address, name = %record.name, "Slot occupied");
        table.occupy(address, record);
        let outcome = if address == preferred {
            RegisterOutcome::Accepted
        } else {
            RegisterOutcome::ReassignedAddress
        };
        (address, outcome)
    }

    /// Returns a copy of the record at `address`.
    pub async fn get(&self, address: Address) -> Option<UserRecord<H>> {
        self.table.read().await.slot(address).cloned()
    }

    /// Returns the live connection registered at `address`.
    ///
    /// `None` for empty slots, the server entry, and connections that have
    /// been dropped or reported dead.
    pub async fn connection(&self, address: Address) -> Option<Arc<H>> {
        let table = self.table.read().await;
        table
            .slot(address)
            .and_then(UserRecord::upgrade)
            .filter(|handle| handle.is_alive())
    }

    /// Empties a client slot unconditionally. Returns true if it was occupied.
    pub async fn remove(&self, address: Address) -> bool {
        self.table.write().await.vacate(address).is_some()
    }

    /// Empties the slot owned by `handle`, returning its address.
    pub async fn release(&self, handle: &Arc<H>) -> Option<Address> {
        let mut table = self.table.write().await;
        let address = table
            .client_addresses()
            .find(|address| table.slot(*address).is_some_and(|r| r.is_held_by(handle)))?;
        table.vacate(address);
        Some(address)
    }

    /// Evicts every client entry whose connection is gone or dead.
    ///
    /// Returns the number of slots emptied.
    pub async fn clean_disconnects(&self) -> usize {
        let mut table = self.table.write().await;
        let dead: Vec<Address> = table
            .client_addresses()
            .filter(|address| table.slot(*address).is_some_and(|r| !r.is_live()))
            .collect();
        for address in &dead {
            table.vacate(*address);
            debug!(address = %address, "Evicted dead connection");
        }
        dead.len()
    }

    /// Snapshot of every occupied slot in ascending address order.
    pub async fn list(&self) -> Vec<ListingEntry> {
        let table = self.table.read().await;
        table
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .map(|record| ListingEntry::new(Address::new(index as u8), &record.name))
            })
            .collect()
    }

    /// Number of occupied slots, including the server entry.
    pub async fn len(&self) -> usize {
        self.table.read().await.occupied
    }

    /// Returns true when only the server entry is present.
    pub async fn is_empty(&self) -> bool {
        self.len().await <= 1
    }
}
