//! Host pool
//!
//! A bounded set of known peer addresses, deduplicated by authority. When
//! full, storing a new address evicts the oldest one. The pool persists to a
//! plain text file with one `ip:port` per line.

use super::authority::Authority;
use crate::error::{Error, Result};
use crate::message::{NetworkAddress, ServiceFlags};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct Hosts {
    capacity: usize,
    file: PathBuf,
    buffer: RwLock<VecDeque<NetworkAddress>>,
}

impl Hosts {
    pub fn new(capacity: usize, file: PathBuf) -> Self {
        Self {
            capacity,
            file,
            buffer: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn exists(&self, authority: &Authority) -> bool {
        self.read().iter().any(|a| a.authority() == *authority)
    }

    /// A random address from the pool.
    pub fn fetch(&self) -> Result<NetworkAddress> {
        let buffer = self.read();
        if buffer.is_empty() {
            return Err(Error::AddressNotFound);
        }
        let index = rand::thread_rng().gen_range(0..buffer.len());
        Ok(buffer[index])
    }

    /// Up to `count` distinct addresses in random order.
    pub fn sample(&self, count: usize) -> Vec<NetworkAddress> {
        let mut addresses: Vec<NetworkAddress> = self.read().iter().copied().collect();
        addresses.shuffle(&mut rand::thread_rng());
        addresses.truncate(count);
        addresses
    }

    /// Add an address. Returns false for invalid or already known addresses,
    /// or when the pool is disabled.
    pub fn store(&self, address: NetworkAddress) -> bool {
        if self.capacity == 0 || !address.is_valid() {
            return false;
        }

        let authority = address.authority();
        let mut buffer = self.write();
        if buffer.iter().any(|a| a.authority() == authority) {
            return false;
        }
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(address);
        true
    }

    /// Add many addresses, returning how many were new.
    pub fn store_many(&self, addresses: &[NetworkAddress]) -> usize {
        let stored = addresses.iter().filter(|a| self.store(**a)).count();
        log::debug!(
            "Stored {} of {} addresses ({} in pool)",
            stored,
            addresses.len(),
            self.count()
        );
        stored
    }

    pub fn remove(&self, authority: &Authority) -> Result<()> {
        let mut buffer = self.write();
        let index = buffer
            .iter()
            .position(|a| a.authority() == *authority)
            .ok_or(Error::NotFound)?;
        buffer.remove(index);
        Ok(())
    }

    /// Populate from the hosts file. A missing file leaves the pool empty;
    /// unparseable lines are skipped.
    pub fn load(&self) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }

        let text = match fs::read_to_string(&self.file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No hosts file at {}", self.file.display());
                return Ok(());
            }
            Err(e) => return Err(self.file_error(e)),
        };

        let now = chrono::Utc::now().timestamp() as u32;
        let mut loaded = 0;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.parse::<Authority>() {
                Ok(authority) => {
                    if self.store(NetworkAddress::new(&authority, ServiceFlags::empty(), now)) {
                        loaded += 1;
                    }
                }
                Err(_) => log::warn!("Skipping invalid hosts entry '{}'", line),
            }
        }

        log::info!("Loaded {} hosts from {}", loaded, self.file.display());
        Ok(())
    }

    /// Write the pool to the hosts file via a temporary file and rename.
    pub fn save(&self) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }

        let temp = self.file.with_extension("tmp");
        {
            let file = fs::File::create(&temp).map_err(|e| self.file_error(e))?;
            let mut writer = BufWriter::new(file);
            for address in self.read().iter() {
                writeln!(writer, "{}", address.authority()).map_err(|e| self.file_error(e))?;
            }
            writer.flush().map_err(|e| self.file_error(e))?;
        }

        // Atomic rename
        fs::rename(&temp, &self.file).map_err(|e| self.file_error(e))?;
        log::info!("Saved {} hosts to {}", self.count(), self.file.display());
        Ok(())
    }

    fn file_error(&self, error: std::io::Error) -> Error {
        Error::FileSystem(format!("{}: {}", self.file.display(), error))
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<NetworkAddress>> {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<NetworkAddress>> {
        self.buffer.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn address(i: u32) -> NetworkAddress {
        let authority: Authority = format!("10.0.{}.{}:8333", i / 256, i % 256).parse().unwrap();
        NetworkAddress::new(&authority, ServiceFlags::NETWORK, 0)
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let hosts = Hosts::new(3, PathBuf::from("unused"));
        for i in 1..=4 {
            assert!(hosts.store(address(i)));
        }

        assert_eq!(hosts.count(), 3);
        assert!(!hosts.exists(&address(1).authority()));
        assert!(hosts.exists(&address(4).authority()));
    }

    #[test]
    fn test_duplicates_and_invalid_rejected() {
        let hosts = Hosts::new(10, PathBuf::from("unused"));
        assert!(hosts.store(address(1)));
        assert!(!hosts.store(address(1)));

        let mut stale = address(1);
        stale.timestamp = 99;
        assert!(!hosts.store(stale));
        assert!(!hosts.store(NetworkAddress::default()));
        assert_eq!(hosts.count(), 1);
    }

    #[test]
    fn test_zero_capacity_disables_pool() {
        let hosts = Hosts::new(0, PathBuf::from("unused"));
        assert!(!hosts.store(address(1)));
        assert_eq!(hosts.fetch(), Err(Error::AddressNotFound));
        assert!(hosts.load().is_ok());
        assert!(hosts.save().is_ok());
    }

    #[test]
    fn test_fetch_and_remove() {
        let hosts = Hosts::new(10, PathBuf::from("unused"));
        assert_eq!(hosts.fetch(), Err(Error::AddressNotFound));

        hosts.store(address(7));
        assert_eq!(hosts.fetch().unwrap(), address(7));
        assert!(hosts.remove(&address(7).authority()).is_ok());
        assert_eq!(hosts.remove(&address(7).authority()), Err(Error::NotFound));
    }

    #[test]
    fn test_sample_is_bounded_and_distinct() {
        let hosts = Hosts::new(100, PathBuf::from("unused"));
        hosts.store_many(&(1..=20).map(address).collect::<Vec<_>>());

        let sample = hosts.sample(5);
        assert_eq!(sample.len(), 5);
        let distinct: HashSet<_> = sample.iter().map(|a| a.authority()).collect();
        assert_eq!(distinct.len(), 5);
        assert_eq!(hosts.sample(1000).len(), 20);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hosts.cache");

        let hosts = Hosts::new(10, file.clone());
        hosts.store_many(&[address(1), address(2), address(3)]);
        hosts.save().unwrap();

        let reloaded = Hosts::new(10, file);
        reloaded.load().unwrap();
        assert_eq!(reloaded.count(), 3);
        assert!(reloaded.exists(&address(2).authority()));
    }

    #[test]
    fn test_load_skips_bad_lines_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hosts.cache");

        let hosts = Hosts::new(10, file.clone());
        hosts.load().unwrap();
        assert!(hosts.is_empty());

        fs::write(&file, "10.0.0.1:8333\ngarbage\n\n[2001:db8::2]:8333\n0.0.0.0:8333\n").unwrap();
        hosts.load().unwrap();
        assert_eq!(hosts.count(), 2);
    }
}
