//! Sub-mixes and the final mix
//!
//! Mixes form a graph rooted at the final mix (id 0). Every frame they are
//! processed farthest-from-final first, so each mix has received all of its
//! inputs before it is mixed onward. Mix buffer offsets are handed out in
//! that same order.

use tracing::warn;

use crate::common::{FINAL_MIX, MAX_MIX_BUFFERS, NO_EFFECT_ORDER, NO_MIX, NO_SPLITTER};
use crate::effect::EffectContext;
use crate::error::{RendererError, Result};
use crate::splitter::SplitterContext;

/// Distance of a mix that cannot reach the final mix
pub const NO_FINAL_MIX: i32 = i32::MIN;

/// Guest update for one mix
#[derive(Debug, Clone)]
pub struct MixParameter {
    pub volume: f32,
    pub sample_rate: u32,
    pub buffer_count: u32,
    pub in_use: bool,
    pub mix_id: i32,
    pub node_id: i32,
    pub dest_mix_id: i32,
    pub splitter_id: i32,
    /// `mix_volume[i][j]` routes this mix's buffer `i` to destination buffer `j`
    pub mix_volume: [[f32; MAX_MIX_BUFFERS]; MAX_MIX_BUFFERS],
}

impl Default for MixParameter {
    fn default() -> Self {
        Self {
            volume: 1.0,
            sample_rate: 48_000,
            buffer_count: 0,
            in_use: false,
            mix_id: 0,
            node_id: 0,
            dest_mix_id: NO_MIX,
            splitter_id: NO_SPLITTER,
            mix_volume: [[0.0; MAX_MIX_BUFFERS]; MAX_MIX_BUFFERS],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerMixInfo {
    params: MixParameter,
    buffer_offset: usize,
    final_mix_distance: i32,
    effect_order: Vec<i32>,
}

impl ServerMixInfo {
    fn new(mix_id: i32, effect_count: usize) -> Self {
        Self {
            params: MixParameter {
                mix_id,
                ..Default::default()
            },
            buffer_offset: 0,
            final_mix_distance: NO_FINAL_MIX,
            effect_order: vec![NO_EFFECT_ORDER; effect_count],
        }
    }

    pub fn params(&self) -> &MixParameter {
        &self.params
    }

    pub fn in_use(&self) -> bool {
        self.params.in_use
    }

    pub fn mix_id(&self) -> i32 {
        self.params.mix_id
    }

    pub fn node_id(&self) -> i32 {
        self.params.node_id
    }

    pub fn volume(&self) -> f32 {
        self.params.volume
    }

    pub fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    pub fn buffer_count(&self) -> usize {
        self.params.buffer_count as usize
    }

    pub fn buffer_offset(&self) -> usize {
        self.buffer_offset
    }

    pub fn dest_mix_id(&self) -> i32 {
        self.params.dest_mix_id
    }

    pub fn splitter_id(&self) -> i32 {
        self.params.splitter_id
    }

    pub fn final_mix_distance(&self) -> i32 {
        self.final_mix_distance
    }

    /// Effect indices in processing order, terminated by `NO_EFFECT_ORDER`
    pub fn effect_order(&self) -> &[i32] {
        &self.effect_order
    }

    /// Routed to another mix, directly or through a splitter
    pub fn has_any_connection(&self) -> bool {
        self.params.dest_mix_id != NO_MIX || self.params.splitter_id != NO_SPLITTER
    }

    pub fn mix_volume(&self, src: usize, dst: usize) -> f32 {
        self.params
            .mix_volume
            .get(src)
            .and_then(|row| row.get(dst))
            .copied()
            .unwrap_or(0.0)
    }

    fn update_effect_order(&mut self, effects: &EffectContext) {
        self.effect_order.fill(NO_EFFECT_ORDER);
        for (index, effect) in effects.iter().enumerate() {
            if effect.mix_id() != self.params.mix_id {
                continue;
            }
            match usize::try_from(effect.processing_order()) {
                Ok(order) if order < self.effect_order.len() => {
                    self.effect_order[order] = index as i32;
                }
                _ => {
                    warn!(
                        "Effect {} on mix {} has invalid processing order {}",
                        index,
                        self.params.mix_id,
                        effect.processing_order()
                    );
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MixContext {
    infos: Vec<ServerMixInfo>,
    sorted: Vec<usize>,
}

impl MixContext {
    /// `count` includes the final mix
    pub fn new(count: usize, effect_count: usize) -> Self {
        Self {
            infos: (0..count)
                .map(|id| ServerMixInfo::new(id as i32, effect_count))
                .collect(),
            sorted: (0..count).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.infos.len()
    }

    pub fn info(&self, mix_id: i32) -> Option<&ServerMixInfo> {
        usize::try_from(mix_id).ok().and_then(|id| self.infos.get(id))
    }

    pub fn final_mix(&self) -> Option<&ServerMixInfo> {
        self.info(FINAL_MIX)
    }

    /// The `index`th mix in processing order
    pub fn sorted_info(&self, index: usize) -> Option<&ServerMixInfo> {
        self.sorted.get(index).and_then(|&i| self.infos.get(i))
    }

    pub fn update(&mut self, param: &MixParameter) -> Result<()> {
        let max = self.infos.len();
        let index = usize::try_from(param.mix_id)
            .ok()
            .filter(|&i| i < max)
            .ok_or(RendererError::OutOfRange {
                what: "mix",
                index: param.mix_id as usize,
                max,
            })?;
        if param.buffer_count as usize > MAX_MIX_BUFFERS {
            return Err(RendererError::OutOfRange {
                what: "mix buffer count",
                index: param.buffer_count as usize,
                max: MAX_MIX_BUFFERS,
            });
        }
        self.infos[index].params = param.clone();
        Ok(())
    }

    pub fn update_effect_order(&mut self, effects: &EffectContext) {
        for info in &mut self.infos {
            info.update_effect_order(effects);
        }
    }

    /// Order mixes by distance from the final mix and assign buffer offsets.
    ///
    /// Fails if the in-use mixes need more than `mix_buffer_count` buffers.
    pub fn sort(&mut self, splitters: &SplitterContext, mix_buffer_count: usize) -> Result<()> {
        self.update_distances(splitters);

        let infos = &self.infos;
        self.sorted = (0..infos.len()).collect();
        self.sorted
            .sort_by_key(|&i| std::cmp::Reverse(infos[i].final_mix_distance));

        let mut offset = 0;
        for &index in &self.sorted {
            let info = &mut self.infos[index];
            if !info.params.in_use {
                continue;
            }
            info.buffer_offset = offset;
            offset += info.params.buffer_count as usize;
        }

        if offset > mix_buffer_count {
            return Err(RendererError::OutOfRange {
                what: "mix buffers",
                index: offset,
                max: mix_buffer_count,
            });
        }
        Ok(())
    }

    fn destinations(&self, index: usize, splitters: &SplitterContext) -> Vec<i32> {
        let params = &self.infos[index].params;
        if params.dest_mix_id != NO_MIX {
            vec![params.dest_mix_id]
        } else if params.splitter_id != NO_SPLITTER {
            splitters.destination_mix_ids(params.splitter_id).collect()
        } else {
            Vec::new()
        }
    }

    fn distance(
        &self,
        index: usize,
        splitters: &SplitterContext,
        memo: &mut [Option<i32>],
        depth: usize,
    ) -> i32 {
        if let Some(distance) = memo[index] {
            return distance;
        }
        // Deeper than the mix count means a cycle
        if depth >= self.infos.len() {
            return NO_FINAL_MIX;
        }

        let distance = if self.infos[index].params.mix_id == FINAL_MIX {
            0
        } else {
            self.destinations(index, splitters)
                .into_iter()
                .filter_map(|id| usize::try_from(id).ok().filter(|&i| i < self.infos.len()))
                .map(|dest| self.distance(dest, splitters, memo, depth + 1))
                .filter(|&d| d != NO_FINAL_MIX)
                .max()
                .map_or(NO_FINAL_MIX, |d| d + 1)
        };

        let distance = if distance >= self.infos.len() as i32 {
            NO_FINAL_MIX
        } else {
            distance
        };
        memo[index] = Some(distance);
        distance
    }

    fn update_distances(&mut self, splitters: &SplitterContext) {
        let mut memo = vec![None; self.infos.len()];
        for index in 0..self.infos.len() {
            let distance = if self.infos[index].params.in_use {
                self.distance(index, splitters, &mut memo, 0)
            } else {
                NO_FINAL_MIX
            };
            self.infos[index].final_mix_distance = distance;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{EffectKind, EffectParameter};
    use crate::splitter::{SplitterDestinationParameter, SplitterParameter};

    fn mix(mix_id: i32, buffer_count: u32, dest_mix_id: i32) -> MixParameter {
        MixParameter {
            in_use: true,
            mix_id,
            buffer_count,
            dest_mix_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_sorted_farthest_first() {
        let mut ctx = MixContext::new(4, 0);
        ctx.update(&mix(0, 2, NO_MIX)).unwrap();
        ctx.update(&mix(1, 2, 0)).unwrap();
        ctx.update(&mix(2, 2, 1)).unwrap();
        ctx.sort(&SplitterContext::default(), 6).unwrap();

        let order: Vec<i32> = (0..3).map(|i| ctx.sorted_info(i).unwrap().mix_id()).collect();
        assert_eq!(order, [2, 1, 0]);
        assert_eq!(ctx.info(2).unwrap().final_mix_distance(), 2);
        assert_eq!(ctx.info(2).unwrap().buffer_offset(), 0);
        assert_eq!(ctx.info(1).unwrap().buffer_offset(), 2);
        assert_eq!(ctx.final_mix().unwrap().buffer_offset(), 4);
        assert_eq!(ctx.info(3).unwrap().final_mix_distance(), NO_FINAL_MIX);
    }

    #[test]
    fn test_cycle_is_capped() {
        let mut ctx = MixContext::new(3, 0);
        ctx.update(&mix(0, 1, NO_MIX)).unwrap();
        ctx.update(&mix(1, 1, 2)).unwrap();
        ctx.update(&mix(2, 1, 1)).unwrap();
        ctx.sort(&SplitterContext::default(), 3).unwrap();
        assert_eq!(ctx.info(1).unwrap().final_mix_distance(), NO_FINAL_MIX);
        assert_eq!(ctx.info(2).unwrap().final_mix_distance(), NO_FINAL_MIX);
        assert_eq!(ctx.sorted_info(0).unwrap().mix_id(), 0);
    }

    #[test]
    fn test_splitter_route_counts_toward_distance() {
        let mut splitters = SplitterContext::new(1, 1);
        splitters
            .update_info(&SplitterParameter {
                id: 0,
                in_use: true,
                destination_ids: vec![0],
            })
            .unwrap();
        splitters
            .update_destination(&SplitterDestinationParameter {
                id: 0,
                mix_id: 1,
                in_use: true,
                ..Default::default()
            })
            .unwrap();

        let mut ctx = MixContext::new(3, 0);
        ctx.update(&mix(0, 2, NO_MIX)).unwrap();
        ctx.update(&mix(1, 2, 0)).unwrap();
        ctx.update(&MixParameter {
            splitter_id: 0,
            ..mix(2, 2, NO_MIX)
        })
        .unwrap();
        ctx.sort(&splitters, 6).unwrap();
        assert_eq!(ctx.info(2).unwrap().final_mix_distance(), 2);
        assert!(ctx.info(2).unwrap().has_any_connection());
    }

    #[test]
    fn test_buffer_overflow_rejected() {
        let mut ctx = MixContext::new(2, 0);
        ctx.update(&mix(0, 4, NO_MIX)).unwrap();
        ctx.update(&mix(1, 4, 0)).unwrap();
        assert!(ctx.sort(&SplitterContext::default(), 6).is_err());
        assert!(ctx.update(&mix(5, 1, 0)).is_err());
        assert!(ctx.update(&mix(1, 25, 0)).is_err());
    }

    #[test]
    fn test_effect_order() {
        let mut effects = EffectContext::new(3);
        let on_mix = |mix_id, order| EffectParameter {
            kind: EffectKind::Stubbed,
            mix_id,
            processing_order: order,
            ..Default::default()
        };
        effects.update(0, &on_mix(1, 1)).unwrap();
        effects.update(1, &on_mix(0, 0)).unwrap();
        effects.update(2, &on_mix(1, 0)).unwrap();

        let mut ctx = MixContext::new(2, 3);
        ctx.update_effect_order(&effects);
        assert_eq!(ctx.info(1).unwrap().effect_order(), &[2, 0, NO_EFFECT_ORDER]);
        assert_eq!(ctx.info(0).unwrap().effect_order(), &[1, NO_EFFECT_ORDER, NO_EFFECT_ORDER]);
    }
}
