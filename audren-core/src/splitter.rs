//! Splitters fan one voice or mix out to several destination mixes.
//!
//! A splitter owns an ordered list of destinations. Each destination names
//! a target mix and carries a current and a last volume per mix buffer; the
//! last volumes only catch up with the current ones once a frame has used
//! them (see [`SplitterContext::update_internal_state`]).

use smallvec::SmallVec;

use crate::common::{MAX_MIX_BUFFERS, NO_MIX};
use crate::error::{RendererError, Result};

/// Guest update for one splitter
#[derive(Debug, Clone, Default)]
pub struct SplitterParameter {
    pub id: u32,
    pub in_use: bool,
    /// Destination ids in send order
    pub destination_ids: Vec<u32>,
}

/// Guest update for one splitter destination
#[derive(Debug, Clone)]
pub struct SplitterDestinationParameter {
    pub id: u32,
    pub mix_id: i32,
    pub mix_volumes: [f32; MAX_MIX_BUFFERS],
    pub in_use: bool,
}

impl Default for SplitterDestinationParameter {
    fn default() -> Self {
        Self {
            id: 0,
            mix_id: NO_MIX,
            mix_volumes: [0.0; MAX_MIX_BUFFERS],
            in_use: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitterDestinationData {
    id: u32,
    mix_id: i32,
    in_use: bool,
    dirty: bool,
    mix_volumes: [f32; MAX_MIX_BUFFERS],
    last_mix_volumes: [f32; MAX_MIX_BUFFERS],
}

impl SplitterDestinationData {
    fn new(id: u32) -> Self {
        Self {
            id,
            mix_id: NO_MIX,
            in_use: false,
            dirty: false,
            mix_volumes: [0.0; MAX_MIX_BUFFERS],
            last_mix_volumes: [0.0; MAX_MIX_BUFFERS],
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mix_id(&self) -> i32 {
        self.mix_id
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// In use and routed to a mix
    pub fn is_configured(&self) -> bool {
        self.in_use && self.mix_id != NO_MIX
    }

    pub fn mix_volumes(&self) -> &[f32; MAX_MIX_BUFFERS] {
        &self.mix_volumes
    }

    pub fn last_mix_volumes(&self) -> &[f32; MAX_MIX_BUFFERS] {
        &self.last_mix_volumes
    }

    pub fn mix_volume(&self, index: usize) -> f32 {
        self.mix_volumes.get(index).copied().unwrap_or(0.0)
    }

    /// Request the last volumes catch up at the end of the frame
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn update(&mut self, param: &SplitterDestinationParameter) {
        // A newly enabled destination starts without a ramp
        if !self.in_use && param.in_use {
            self.last_mix_volumes = param.mix_volumes;
            self.dirty = false;
        }
        self.mix_id = param.mix_id;
        self.mix_volumes = param.mix_volumes;
        self.in_use = param.in_use;
    }

    fn update_internal_state(&mut self) {
        if self.in_use && self.dirty {
            self.last_mix_volumes = self.mix_volumes;
        }
        self.dirty = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct SplitterInfo {
    id: u32,
    in_use: bool,
    destinations: SmallVec<[usize; 8]>,
}

impl SplitterInfo {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// Destination indices in send order
    pub fn destinations(&self) -> &[usize] {
        &self.destinations
    }
}

/// All splitters and destinations of one renderer
#[derive(Debug, Default)]
pub struct SplitterContext {
    infos: Vec<SplitterInfo>,
    destinations: Vec<SplitterDestinationData>,
}

impl SplitterContext {
    pub fn new(info_count: usize, destination_count: usize) -> Self {
        Self {
            infos: (0..info_count)
                .map(|id| SplitterInfo {
                    id: id as u32,
                    ..Default::default()
                })
                .collect(),
            destinations: (0..destination_count)
                .map(|id| SplitterDestinationData::new(id as u32))
                .collect(),
        }
    }

    pub fn info_count(&self) -> usize {
        self.infos.len()
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    pub fn info(&self, splitter_id: i32) -> Option<&SplitterInfo> {
        usize::try_from(splitter_id)
            .ok()
            .and_then(|id| self.infos.get(id))
    }

    pub fn update_info(&mut self, param: &SplitterParameter) -> Result<()> {
        let count = self.infos.len();
        let destination_count = self.destinations.len();
        let info = self
            .infos
            .get_mut(param.id as usize)
            .ok_or(RendererError::OutOfRange {
                what: "splitter",
                index: param.id as usize,
                max: count,
            })?;

        let mut destinations = SmallVec::new();
        for &id in &param.destination_ids {
            if id as usize >= destination_count {
                return Err(RendererError::OutOfRange {
                    what: "splitter destination",
                    index: id as usize,
                    max: destination_count,
                });
            }
            destinations.push(id as usize);
        }

        info.in_use = param.in_use;
        info.destinations = destinations;
        Ok(())
    }

    pub fn update_destination(&mut self, param: &SplitterDestinationParameter) -> Result<()> {
        let count = self.destinations.len();
        let destination = self
            .destinations
            .get_mut(param.id as usize)
            .ok_or(RendererError::OutOfRange {
                what: "splitter destination",
                index: param.id as usize,
                max: count,
            })?;
        destination.update(param);
        Ok(())
    }

    fn destination_slot(&self, splitter_id: i32, index: usize) -> Option<usize> {
        let info = self.info(splitter_id)?;
        if !info.in_use {
            return None;
        }
        info.destinations.get(index).copied()
    }

    /// The `index`th destination of a splitter, in send order
    pub fn destination(&self, splitter_id: i32, index: usize) -> Option<&SplitterDestinationData> {
        let slot = self.destination_slot(splitter_id, index)?;
        self.destinations.get(slot)
    }

    pub fn destination_mut(
        &mut self,
        splitter_id: i32,
        index: usize,
    ) -> Option<&mut SplitterDestinationData> {
        let slot = self.destination_slot(splitter_id, index)?;
        self.destinations.get_mut(slot)
    }

    /// Mix ids reachable through a splitter's configured destinations
    pub fn destination_mix_ids(&self, splitter_id: i32) -> impl Iterator<Item = i32> + '_ {
        let slots: &[usize] = match self.info(splitter_id) {
            Some(info) if info.in_use => info.destinations.as_slice(),
            _ => &[],
        };
        slots
            .iter()
            .filter_map(|&slot| self.destinations.get(slot))
            .filter(|d| d.is_configured())
            .map(|d| d.mix_id)
    }

    /// Commit dirty destination volumes at the end of command generation
    pub fn update_internal_state(&mut self) {
        for destination in &mut self.destinations {
            destination.update_internal_state();
        }
    }
}
