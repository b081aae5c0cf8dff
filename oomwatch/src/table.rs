use anyhow::{Context, Result};
use aya::maps::{HashMap, MapData, MapError};
use oomwatch_common::OomEvent;
use std::borrow::{Borrow, BorrowMut};

/// Consumer side of the pid-keyed table the probe writes into. Only the
/// consumer ever deletes.
pub trait TableDrain {
    /// Keys currently present, in no particular order.
    fn pending_pids(&self) -> Result<Vec<u32>>;

    /// `None` when the key disappeared since it was listed.
    fn read(&self, pid: u32) -> Result<Option<OomEvent>>;

    /// Deleting an already absent key is not an error.
    fn delete(&mut self, pid: u32) -> Result<()>;
}

impl<T> TableDrain for HashMap<T, u32, OomEvent>
where
    T: Borrow<MapData> + BorrowMut<MapData>,
{
    fn pending_pids(&self) -> Result<Vec<u32>> {
        self.keys()
            .collect::<Result<Vec<_>, MapError>>()
            .context("Failed to iterate OOM_EVENTS keys")
    }

    fn read(&self, pid: u32) -> Result<Option<OomEvent>> {
        match self.get(&pid, 0) {
            Ok(event) => Ok(Some(event)),
            Err(MapError::KeyNotFound) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read OOM_EVENTS[{}]", pid)),
        }
    }

    fn delete(&mut self, pid: u32) -> Result<()> {
        match self.remove(&pid) {
            Ok(()) => Ok(()),
            // delete reports a raw ENOENT; confirm with a lookup
            Err(e) => match self.get(&pid, 0) {
                Err(MapError::KeyNotFound) => Ok(()),
                _ => Err(e).with_context(|| format!("Failed to delete OOM_EVENTS[{}]", pid)),
            },
        }
    }
}
