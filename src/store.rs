//! Dealership record store
//!
//! Owns the inventory and the test-drive book. A store instance is created by
//! the caller and injected into tools through `ToolContext`; there is no
//! process-wide singleton. Optionally backed by a JSON file that is rewritten
//! after every mutation.

mod records;

pub use records::*;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Car is not available: {0}")]
    CarNotAvailable(String),
    #[error("Store file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything the store persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub inventory: Inventory,
    pub test_drives: Vec<TestDrive>,
    /// Next code to hand out. Codes are never reused, even after cancellation.
    pub next_code: u32,
}

impl StoreSnapshot {
    fn seeded() -> Self {
        Self {
            inventory: initial_stock(),
            test_drives: Vec::new(),
            next_code: 1,
        }
    }
}

/// Thread-safe dealership store
pub struct DealershipStore {
    records: Mutex<StoreSnapshot>,
    path: Option<PathBuf>,
}

impl Default for DealershipStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DealershipStore {
    /// In-memory store with the opening stock
    pub fn new() -> Self {
        Self::from_snapshot(StoreSnapshot::seeded())
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            records: Mutex::new(snapshot),
            path: None,
        }
    }

    /// Open a file-backed store, seeding it when the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreSnapshot::seeded()
        };
        let store = Self {
            records: Mutex::new(snapshot),
            path: Some(path),
        };
        store.flush(&store.lock())?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, StoreSnapshot> {
        // A poisoned lock only means another thread panicked mid-read; the
        // snapshot itself is never left half-written.
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn flush(&self, records: &StoreSnapshot) -> StoreResult<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(records)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.lock().clone()
    }

    // ==================== Inventory ====================

    pub fn available_cars(&self) -> Vec<Car> {
        self.lock().inventory.availables.clone()
    }

    pub fn out_of_stock_cars(&self) -> Vec<Car> {
        self.lock().inventory.out_of_stock.clone()
    }

    /// Move a car from available to out-of-stock. Returns false if it was not
    /// available.
    pub fn mark_out_of_stock(&self, car: &Car) -> StoreResult<bool> {
        let mut records = self.lock();
        let Some(index) = records
            .inventory
            .availables
            .iter()
            .position(|c| c.same_vehicle(car))
        else {
            return Ok(false);
        };
        let removed = records.inventory.availables.remove(index);
        records.inventory.out_of_stock.push(removed);
        self.flush(&records)?;
        Ok(true)
    }

    // ==================== Test Drives ====================

    /// Book a test drive and return its code
    pub fn schedule_test_drive(
        &self,
        date: NaiveDateTime,
        car: &Car,
        name: &str,
        driver_licence: &str,
    ) -> StoreResult<u32> {
        let mut records = self.lock();
        let car = records
            .inventory
            .find_available(car)
            .cloned()
            .ok_or_else(|| StoreError::CarNotAvailable(car.to_string()))?;

        let code = records.next_code;
        records.next_code += 1;
        records.test_drives.push(TestDrive {
            code,
            date,
            car,
            name: name.to_string(),
            driver_licence: driver_licence.to_string(),
            status: TestDriveStatus::Scheduled,
        });
        self.flush(&records)?;

        tracing::info!(code, name = %name, "Scheduled test drive");
        Ok(code)
    }

    pub fn list_test_drives(&self) -> Vec<TestDrive> {
        self.lock().test_drives.clone()
    }

    /// Cancel a scheduled test drive. Returns false when no scheduled record
    /// carries the code.
    pub fn cancel_test_drive(&self, code: u32) -> StoreResult<bool> {
        let mut records = self.lock();
        let Some(test_drive) = records
            .test_drives
            .iter_mut()
            .find(|t| t.code == code && t.status == TestDriveStatus::Scheduled)
        else {
            tracing::info!(code, "No scheduled test drive to cancel");
            return Ok(false);
        };
        test_drive.status = TestDriveStatus::Canceled;
        self.flush(&records)?;

        tracing::info!(code, "Canceled test drive");
        Ok(true)
    }
}
