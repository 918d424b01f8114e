//! Effects attached to mixes
//!
//! Effects run inside their mix's command generation in the mix's
//! processing order. Only aux send/return, the biquad filter and the I3DL2
//! pass-through produce audio; delay and reverb are accepted and tracked
//! but contribute nothing.

mod aux_buffer;

pub use aux_buffer::{AuxInfoDsp, read_aux_buffer, reset_aux_info, write_aux_buffer};

use crate::common::{MAX_CHANNEL_COUNT, MAX_MIX_BUFFERS, NO_MIX};
use crate::error::{RendererError, Result};

/// Buffer routing shared by the per-channel effects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelRouting {
    pub input: [u8; MAX_CHANNEL_COUNT],
    pub output: [u8; MAX_CHANNEL_COUNT],
    pub channel_count: u8,
}

impl ChannelRouting {
    /// (input, output) pairs relative to the mix buffer offset
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let count = (self.channel_count as usize).min(MAX_CHANNEL_COUNT);
        self.input[..count]
            .iter()
            .zip(&self.output[..count])
            .map(|(&i, &o)| (i as usize, o as usize))
    }
}

/// Aux send/return parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxParameter {
    pub input: [u8; MAX_MIX_BUFFERS],
    pub output: [u8; MAX_MIX_BUFFERS],
    /// Channels routed through the rings
    pub mix_buffer_count: u32,
    pub sample_rate: u32,
    /// Ring size in samples
    pub sample_count: u32,
    /// Send ring header; samples follow it
    pub send_buffer_info: u64,
    /// Return ring header; samples follow it
    pub return_buffer_info: u64,
}

impl Default for AuxParameter {
    fn default() -> Self {
        Self {
            input: [0; MAX_MIX_BUFFERS],
            output: [0; MAX_MIX_BUFFERS],
            mix_buffer_count: 0,
            sample_rate: 48_000,
            sample_count: 0,
            send_buffer_info: 0,
            return_buffer_info: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiquadFilterEffectParameter {
    pub routing: ChannelRouting,
    pub numerator: [i16; 3],
    pub denominator: [i16; 2],
}

/// Effect type with its type-specific parameters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum EffectKind {
    #[default]
    Stubbed,
    Aux(AuxParameter),
    Delay(ChannelRouting),
    Reverb(ChannelRouting),
    I3dl2Reverb(ChannelRouting),
    BiquadFilter(BiquadFilterEffectParameter),
}

impl EffectKind {
    fn same_type(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Guest update for one effect
#[derive(Debug, Clone, Default)]
pub struct EffectParameter {
    pub kind: EffectKind,
    pub is_new: bool,
    pub enabled: bool,
    pub mix_id: i32,
    pub processing_order: i32,
}

/// Lifecycle reported back to the guest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UsageState {
    #[default]
    Invalid,
    New,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectOutStatus {
    pub state: UsageState,
}

/// Guest addresses of an aux effect's rings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuxRings {
    pub send_info: u64,
    pub send_buffer: u64,
    pub return_info: u64,
    pub return_buffer: u64,
}

impl AuxRings {
    fn from_parameter(param: &AuxParameter) -> Self {
        let follow = |info: u64| if info == 0 { 0 } else { info + AuxInfoDsp::SIZE };
        Self {
            send_info: param.send_buffer_info,
            send_buffer: follow(param.send_buffer_info),
            return_info: param.return_buffer_info,
            return_buffer: follow(param.return_buffer_info),
        }
    }
}

/// Server-side effect
#[derive(Debug, Clone)]
pub struct EffectInfo {
    kind: EffectKind,
    enabled: bool,
    mix_id: i32,
    processing_order: i32,
    usage: UsageState,
    was_enabled: bool,
    rings: AuxRings,
    biquad_state: [[i64; 2]; MAX_CHANNEL_COUNT],
}

impl Default for EffectInfo {
    fn default() -> Self {
        Self {
            kind: EffectKind::Stubbed,
            enabled: false,
            mix_id: NO_MIX,
            processing_order: -1,
            usage: UsageState::Invalid,
            was_enabled: false,
            rings: AuxRings::default(),
            biquad_state: [[0; 2]; MAX_CHANNEL_COUNT],
        }
    }
}

impl EffectInfo {
    pub fn kind(&self) -> &EffectKind {
        &self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enabled now but not during the previous frame
    pub fn just_enabled(&self) -> bool {
        self.enabled && !self.was_enabled
    }

    pub fn mix_id(&self) -> i32 {
        self.mix_id
    }

    pub fn processing_order(&self) -> i32 {
        self.processing_order
    }

    pub fn usage(&self) -> UsageState {
        self.usage
    }

    pub fn rings(&self) -> &AuxRings {
        &self.rings
    }

    pub fn biquad_state_mut(&mut self, channel: usize) -> Option<&mut [i64; 2]> {
        self.biquad_state.get_mut(channel)
    }

    pub fn update(&mut self, param: &EffectParameter) {
        if !self.kind.same_type(&param.kind) {
            self.biquad_state = [[0; 2]; MAX_CHANNEL_COUNT];
            self.was_enabled = false;
        }
        self.kind = param.kind;
        self.enabled = param.enabled;
        self.mix_id = param.mix_id;
        self.processing_order = param.processing_order;
        self.rings = match &param.kind {
            EffectKind::Aux(aux) => AuxRings::from_parameter(aux),
            _ => AuxRings::default(),
        };
        if param.is_new {
            self.usage = UsageState::New;
        }
    }

    /// Latch the enable state once the frame's commands are generated
    pub fn update_for_command_generation(&mut self) {
        self.usage = if self.enabled {
            UsageState::Enabled
        } else {
            UsageState::Disabled
        };
        self.was_enabled = self.enabled;
    }

    pub fn out_status(&self) -> EffectOutStatus {
        EffectOutStatus { state: self.usage }
    }
}

#[derive(Debug, Default)]
pub struct EffectContext {
    infos: Vec<EffectInfo>,
}

impl EffectContext {
    pub fn new(count: usize) -> Self {
        Self {
            infos: vec![EffectInfo::default(); count],
        }
    }

    pub fn count(&self) -> usize {
        self.infos.len()
    }

    pub fn info(&self, index: usize) -> Option<&EffectInfo> {
        self.infos.get(index)
    }

    pub fn info_mut(&mut self, index: usize) -> Option<&mut EffectInfo> {
        self.infos.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectInfo> {
        self.infos.iter()
    }

    pub fn update(&mut self, index: usize, param: &EffectParameter) -> Result<()> {
        let max = self.infos.len();
        let info = self.infos.get_mut(index).ok_or(RendererError::OutOfRange {
            what: "effect",
            index,
            max,
        })?;
        info.update(param);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn biquad_param(enabled: bool) -> EffectParameter {
        EffectParameter {
            kind: EffectKind::BiquadFilter(BiquadFilterEffectParameter::default()),
            is_new: true,
            enabled,
            mix_id: 0,
            processing_order: 0,
        }
    }

    #[test]
    fn test_usage_lifecycle() {
        let mut ctx = EffectContext::new(1);
        ctx.update(0, &biquad_param(true)).unwrap();
        let info = ctx.info_mut(0).unwrap();
        assert_eq!(info.out_status().state, UsageState::New);
        assert!(info.just_enabled());

        info.update_for_command_generation();
        assert_eq!(info.usage(), UsageState::Enabled);
        assert!(!info.just_enabled());

        info.update(&EffectParameter {
            is_new: false,
            ..biquad_param(false)
        });
        info.update_for_command_generation();
        assert_eq!(info.usage(), UsageState::Disabled);
    }

    #[test]
    fn test_type_change_resets_state() {
        let mut info = EffectInfo::default();
        info.update(&biquad_param(true));
        *info.biquad_state_mut(0).unwrap() = [5, 6];
        info.update(&biquad_param(true));
        assert_eq!(*info.biquad_state_mut(0).unwrap(), [5, 6]);

        info.update(&EffectParameter {
            kind: EffectKind::Delay(ChannelRouting::default()),
            ..biquad_param(true)
        });
        assert_eq!(*info.biquad_state_mut(0).unwrap(), [0, 0]);
    }

    #[test]
    fn test_aux_rings_follow_headers() {
        let mut info = EffectInfo::default();
        info.update(&EffectParameter {
            kind: EffectKind::Aux(AuxParameter {
                send_buffer_info: 0x2000,
                ..Default::default()
            }),
            ..Default::default()
        });
        let rings = info.rings();
        assert_eq!(rings.send_buffer, 0x2040);
        assert_eq!(rings.return_info, 0);
        assert_eq!(rings.return_buffer, 0);
    }

    #[test]
    fn test_routing_pairs_bounded() {
        let routing = ChannelRouting {
            input: [0, 1, 2, 3, 4, 5],
            output: [6, 7, 8, 9, 10, 11],
            channel_count: 9,
        };
        assert_eq!(routing.pairs().count(), MAX_CHANNEL_COUNT);
        assert_eq!(routing.pairs().next(), Some((0, 6)));
    }

    #[test]
    fn test_update_out_of_range() {
        let mut ctx = EffectContext::new(1);
        assert!(ctx.update(3, &biquad_param(true)).is_err());
    }
}
