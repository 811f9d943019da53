// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device topology registry: two direction-indexed device lists plus
//! the reserved fallback/hotword devices, grounded on the add/remove/
//! lookup surface of `cras_iodev_list.c`.

use crate::errors::RegistryError;
use crate::types::{Device, Direction, RESERVED_MAX};

#[derive(Default)]
pub struct DeviceRegistry {
    outputs: Vec<Device>,
    inputs: Vec<Device>,
    next_idx: u32,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            outputs: Vec::new(),
            inputs: Vec::new(),
            next_idx: RESERVED_MAX,
        }
    }

    fn list(&self, direction: Direction) -> &Vec<Device> {
        match direction {
            Direction::Output => &self.outputs,
            Direction::Input => &self.inputs,
        }
    }

    fn list_mut(&mut self, direction: Direction) -> &mut Vec<Device> {
        match direction {
            Direction::Output => &mut self.outputs,
            Direction::Input => &mut self.inputs,
        }
    }

    /// Allocates a fresh `idx`: monotonic, skipping reserved values and
    /// anything already present (I1).
    fn alloc_idx(&mut self) -> u32 {
        loop {
            let candidate = self.next_idx;
            self.next_idx += 1;
            if candidate < RESERVED_MAX {
                continue;
            }
            if self.find_by_idx(candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Inserts a device whose `idx` is already set (used for the
    /// reserved fallback devices created at init, which bypass the
    /// monotonic allocator).
    pub fn insert_reserved(&mut self, device: Device) {
        let direction = device.direction;
        self.list_mut(direction).insert(0, device);
    }

    /// Adds a device to the registry. `expected_direction` mirrors the
    /// spec's split `add_output`/`add_input` entry points: passing a
    /// device whose own `direction` disagrees is rejected rather than
    /// silently filed under the wrong list.
    pub fn add(&mut self, expected_direction: Direction, mut device: Device) -> Result<u32, RegistryError> {
        if device.direction != expected_direction {
            return Err(RegistryError::WrongDirection);
        }
        let idx = self.alloc_idx();
        device.idx = idx;
        self.list_mut(expected_direction).insert(0, device);
        Ok(idx)
    }

    pub fn add_output(&mut self, device: Device) -> Result<u32, RegistryError> {
        self.add(Direction::Output, device)
    }

    pub fn add_input(&mut self, device: Device) -> Result<u32, RegistryError> {
        self.add(Direction::Input, device)
    }

    pub fn remove(&mut self, idx: u32) -> Result<Device, RegistryError> {
        let direction = self
            .find_by_idx(idx)
            .map(|d| d.direction)
            .ok_or(RegistryError::NotFound)?;
        let list = self.list_mut(direction);
        let pos = list.iter().position(|d| d.idx == idx).ok_or(RegistryError::NotFound)?;
        if list[pos].is_open() {
            return Err(RegistryError::Busy);
        }
        Ok(list.remove(pos))
    }

    pub fn find_by_idx(&self, idx: u32) -> Option<&Device> {
        self.outputs
            .iter()
            .chain(self.inputs.iter())
            .find(|d| d.idx == idx)
    }

    pub fn find_by_idx_mut(&mut self, idx: u32) -> Option<&mut Device> {
        if let Some(pos) = self.outputs.iter().position(|d| d.idx == idx) {
            return self.outputs.get_mut(pos);
        }
        self.inputs.iter_mut().find(|d| d.idx == idx)
    }

    pub fn find_first_enabled(&self, direction: Direction) -> Option<&Device> {
        self.list(direction).iter().find(|d| d.is_enabled)
    }

    pub fn iter(&self, direction: Direction) -> impl Iterator<Item = &Device> {
        self.list(direction).iter()
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &Device> {
        self.outputs.iter().chain(self.inputs.iter())
    }

    /// The group `d` belongs to (including `d` itself), and its size.
    /// Devices with no `group` set form a singleton group of `d` alone.
    pub fn group_of(&self, idx: u32) -> Vec<u32> {
        let Some(dev) = self.find_by_idx(idx) else {
            return Vec::new();
        };
        match dev.group {
            None => vec![idx],
            Some(group) => self
                .iter_all()
                .filter(|d| d.group == Some(group))
                .map(|d| d.idx)
                .collect(),
        }
    }

    pub fn group_has_open(&self, idx: u32) -> bool {
        self.group_of(idx)
            .iter()
            .filter_map(|i| self.find_by_idx(*i))
            .any(|d| d.is_open())
    }

    pub fn in_same_group(&self, a: u32, b: u32) -> bool {
        if a == b {
            return true;
        }
        match (self.find_by_idx(a), self.find_by_idx(b)) {
            (Some(da), Some(db)) => da.group.is_some() && da.group == db.group,
            _ => false,
        }
    }

    pub fn group_has_dev(&self, idx: u32, target: u32) -> bool {
        self.group_of(idx).contains(&target)
    }

    /// First device whose active node carries `sco_offload`, per
    /// direction.
    pub fn get_sco_pcm_iodev(&self, direction: Direction) -> Option<&Device> {
        self.list(direction)
            .iter()
            .find(|d| d.active_node().is_some_and(|n| n.sco_offload))
    }

    pub fn enabled(&self, direction: Direction) -> Vec<u32> {
        self.list(direction)
            .iter()
            .filter(|d| d.is_enabled)
            .map(|d| d.idx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Device;

    fn dev(direction: Direction) -> Device {
        Device::new(0, direction, 2)
    }

    #[test]
    fn add_assigns_monotonic_idx_above_reserved() {
        let mut reg = DeviceRegistry::new();
        let a = reg.add_output(dev(Direction::Output)).unwrap();
        let b = reg.add_output(dev(Direction::Output)).unwrap();
        assert!(a >= RESERVED_MAX);
        assert_ne!(a, b);
    }

    #[test]
    fn remove_busy_device_is_rejected() {
        let mut reg = DeviceRegistry::new();
        let idx = reg.add_output(dev(Direction::Output)).unwrap();
        reg.find_by_idx_mut(idx).unwrap().state = crate::types::DeviceState::Open;
        assert_eq!(reg.remove(idx), Err(RegistryError::Busy));
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let mut reg = DeviceRegistry::new();
        assert_eq!(reg.remove(999), Err(RegistryError::NotFound));
    }

    #[test]
    fn group_of_singleton_when_no_group_set() {
        let mut reg = DeviceRegistry::new();
        let idx = reg.add_output(dev(Direction::Output)).unwrap();
        assert_eq!(reg.group_of(idx), vec![idx]);
    }

    #[test]
    fn r1_add_then_remove_closed_device_is_a_no_op() {
        let mut reg = DeviceRegistry::new();
        let before = reg.enabled(Direction::Output);
        let idx = reg.add_output(dev(Direction::Output)).unwrap();
        reg.remove(idx).unwrap();
        let after = reg.enabled(Direction::Output);
        assert_eq!(before, after);
    }
}
