//! Global Settings
//!
//! Engine-wide definitions loaded from the global settings file:
//! - Categories (named gain buckets)
//! - Variables (global scalars, or per-cue values such as "Distance")
//! - RPC curves mapping a variable to a volume/reverb/filter parameter
//!
//! Definitions are shared as `Arc`s so sound definitions can hold direct
//! references. The few mutable values (category gain, global variable
//! value) live in atomics, so the audio-control thread never takes a lock
//! to read them.

use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use cb_core::{
    BankReader, BankWriter, CueError, CueResult, SETTINGS_FORMAT_VERSION, centibels_to_gain,
};

// ═══════════════════════════════════════════════════════════════════════════════
// ATOMIC F32
// ═══════════════════════════════════════════════════════════════════════════════

/// f32 stored as raw bits in an `AtomicU32`
#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CATEGORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Named gain bucket shared by every sound assigned to it
#[derive(Debug)]
pub struct AudioCategory {
    name: String,
    background_music: bool,
    centibels: i32,
    behavior: i32,
    max_instances: i32,
    volume_boost: f32,
    gain: AtomicF32,
}

impl AudioCategory {
    /// Create a category from its stored attenuation (dB * 100)
    pub fn new(name: impl Into<String>, centibels: i32, volume_boost: f32) -> Self {
        Self {
            name: name.into(),
            background_music: false,
            centibels,
            behavior: 0,
            max_instances: 1,
            volume_boost,
            gain: AtomicF32::new(centibels_to_gain(centibels)),
        }
    }

    fn read(reader: &mut BankReader<'_>, volume_boost: f32) -> CueResult<Self> {
        let name = reader.read_string()?;
        let background_music = reader.read_bool()?;
        let centibels = reader.read_i32()?;
        let behavior = reader.read_i32()?;
        let max_instances = reader.read_i32()?;
        if max_instances <= 0 {
            return Err(CueError::Malformed(format!(
                "category '{}' has max instances {}",
                name, max_instances
            )));
        }

        Ok(Self {
            background_music,
            behavior,
            max_instances,
            ..Self::new(name, centibels, volume_boost)
        })
    }

    fn write(&self, writer: &mut BankWriter) {
        writer
            .write_string(&self.name)
            .write_bool(self.background_music)
            .write_i32(self.centibels)
            .write_i32(self.behavior)
            .write_i32(self.max_instances);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current linear gain
    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Set the category volume (linear, nominally 0..1)
    ///
    /// The stored gain is `gain * volume_boost`.
    pub fn set_volume(&self, gain: f32) {
        if gain > 1.0 {
            log::warn!(
                "[Category] '{}' volume {} above unity, applying anyway",
                self.name,
                gain
            );
        }
        self.gain.store(gain * self.volume_boost);
    }

    pub fn is_background_music(&self) -> bool {
        self.background_music
    }

    /// Behavior when the category instance limit is reached (0 = fail to play)
    pub fn behavior(&self) -> i32 {
        self.behavior
    }

    pub fn max_instances(&self) -> i32 {
        self.max_instances
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VARIABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Named scalar that drives RPC curves
///
/// Only global variables carry a value here. Non-global variables are
/// resolved from the cue being evaluated.
#[derive(Debug)]
pub struct Variable {
    name: String,
    is_global: bool,
    min: f32,
    max: f32,
    value: AtomicF32,
}

impl Variable {
    pub fn new(name: impl Into<String>, is_global: bool, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            is_global,
            min,
            max,
            value: AtomicF32::new(0.0),
        }
    }

    fn read(reader: &mut BankReader<'_>) -> CueResult<Self> {
        let name = reader.read_string()?;
        let is_global = reader.read_bool()?;
        let min = reader.read_f64()? as f32;
        let max = reader.read_f64()? as f32;
        Ok(Self::new(name, is_global, min, max))
    }

    fn write(&self, writer: &mut BankWriter) {
        writer
            .write_string(&self.name)
            .write_bool(self.is_global)
            .write_f64(self.min as f64)
            .write_f64(self.max as f64);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_global(&self) -> bool {
        self.is_global
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// Value of a global variable (0.0 until set)
    #[inline]
    pub fn value(&self) -> f32 {
        self.value.load()
    }

    pub(crate) fn set(&self, value: f32) {
        self.value.store(value);
    }
}

/// Source of per-cue (non-global) variable values
pub trait VariableSource {
    fn variable(&self, name: &str) -> CueResult<f32>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// RPC CURVE
// ═══════════════════════════════════════════════════════════════════════════════

/// Interpolation shape of the segment ending at a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RpcCurveKind {
    /// Straight ratio
    #[default]
    Linear = 0,
    /// Squared ratio, biased towards the segment's end point
    Fast = 1,
    /// (1 - cos(pi * ratio)) / 2, ease-in/ease-out
    SinCos = 3,
}

impl RpcCurveKind {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(RpcCurveKind::Linear),
            1 => Some(RpcCurveKind::Fast),
            3 => Some(RpcCurveKind::SinCos),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Reshape a 0..1 ratio
    #[inline]
    pub fn shape(self, ratio: f32) -> f32 {
        match self {
            RpcCurveKind::Linear => ratio,
            RpcCurveKind::Fast => ratio * ratio,
            RpcCurveKind::SinCos => (1.0 - (PI * ratio).cos()) / 2.0,
        }
    }
}

/// Parameter an RPC curve drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcParameter {
    /// Volume offset in centibels (summed across curves)
    Volume = 0,
    /// Reverb level (last curve wins)
    Reverb = 2,
    /// Low-pass cutoff in Hz (most restrictive curve wins)
    Filter = 3,
}

impl RpcParameter {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(RpcParameter::Volume),
            2 => Some(RpcParameter::Reverb),
            3 => Some(RpcParameter::Filter),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Curve control point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcPoint {
    pub x: f32,
    pub y: f32,
    /// Shape of the segment arriving at this point
    pub kind: RpcCurveKind,
}

impl RpcPoint {
    pub fn new(x: f32, y: f32, kind: RpcCurveKind) -> Self {
        Self { x, y, kind }
    }
}

/// Piecewise curve mapping a variable's value to a parameter
#[derive(Debug)]
pub struct RpcCurve {
    name: String,
    variable: Arc<Variable>,
    points: Vec<RpcPoint>,
    parameter: RpcParameter,
}

impl RpcCurve {
    /// Build a curve; points are sorted by x
    pub fn new(
        name: impl Into<String>,
        variable: Arc<Variable>,
        mut points: Vec<RpcPoint>,
        parameter: RpcParameter,
    ) -> CueResult<Self> {
        let name = name.into();
        if points.is_empty() {
            return Err(CueError::Malformed(format!("curve '{}' has no points", name)));
        }
        if points.windows(2).any(|w| w[0].x > w[1].x) {
            log::warn!("[RPC] curve '{}' points out of order, sorting", name);
            points.sort_by(|a, b| a.x.total_cmp(&b.x));
        }
        Ok(Self {
            name,
            variable,
            points,
            parameter,
        })
    }

    fn read(reader: &mut BankReader<'_>, variables: &[Arc<Variable>]) -> CueResult<Self> {
        let name = reader.read_string()?;
        let var_name = reader.read_string()?;
        let variable = variables
            .iter()
            .find(|v| v.name == var_name)
            .cloned()
            .ok_or(CueError::UnresolvedReference {
                kind: "variable",
                name: var_name,
            })?;

        let count = reader.read_count("curve point", 20)?;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let x = reader.read_f64()? as f32;
            let y = reader.read_f64()? as f32;
            let code = reader.read_i32()?;
            let kind = RpcCurveKind::from_code(code).ok_or_else(|| {
                CueError::Malformed(format!("curve '{}' has unknown point shape {}", name, code))
            })?;
            points.push(RpcPoint::new(x, y, kind));
        }

        let code = reader.read_i32()?;
        let parameter = RpcParameter::from_code(code).ok_or_else(|| {
            CueError::Malformed(format!("curve '{}' has unknown parameter {}", name, code))
        })?;

        Self::new(name, variable, points, parameter)
    }

    fn write(&self, writer: &mut BankWriter) {
        writer
            .write_string(&self.name)
            .write_string(&self.variable.name)
            .write_count(self.points.len());
        for p in &self.points {
            writer
                .write_f64(p.x as f64)
                .write_f64(p.y as f64)
                .write_i32(p.kind.code());
        }
        writer.write_i32(self.parameter.code());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variable(&self) -> &Arc<Variable> {
        &self.variable
    }

    pub fn points(&self) -> &[RpcPoint] {
        &self.points
    }

    pub fn parameter(&self) -> RpcParameter {
        self.parameter
    }

    /// Evaluate the curve at `input`
    ///
    /// Inputs at or beyond either end clamp to that end point's y.
    pub fn evaluate(&self, input: f32) -> f32 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if input <= first.x {
            return first.y;
        }
        if input >= last.x {
            return last.y;
        }

        // First point at or right of the input; 1..len by the checks above
        let i = self.points.partition_point(|p| p.x < input);
        let next = self.points[i];
        if next.x == input {
            return next.y;
        }
        let prev = self.points[i - 1];

        // Distance from the end point, 1.0 at `prev`, 0.0 at `next`
        let ratio = (next.x - input) / (next.x - prev.x);
        let ratio = next.kind.shape(ratio);
        prev.y * ratio + next.y * (1.0 - ratio)
    }

    /// Evaluate against the bound variable
    ///
    /// Global variables are read directly; others come from `cue`.
    pub fn value(&self, cue: &dyn VariableSource) -> CueResult<f32> {
        let input = if self.variable.is_global {
            self.variable.value()
        } else {
            cue.variable(&self.variable.name)?
        };
        Ok(self.evaluate(input))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Contents of a global settings file
#[derive(Debug, Default)]
pub struct GlobalSettings {
    pub categories: Vec<Arc<AudioCategory>>,
    pub variables: Vec<Arc<Variable>>,
    pub curves: Vec<Arc<RpcCurve>>,
}

impl GlobalSettings {
    /// Parse a settings blob
    ///
    /// Categories, variables and curves are read in that order; curves bind
    /// to the variables read before them.
    pub fn parse(bytes: &[u8], category_volume_boost: f32) -> CueResult<Self> {
        let mut reader = BankReader::new(bytes, "global settings");
        reader.expect_version(SETTINGS_FORMAT_VERSION)?;

        let count = reader.read_count("category", 15)?;
        let mut categories = Vec::with_capacity(count);
        for _ in 0..count {
            categories.push(Arc::new(AudioCategory::read(
                &mut reader,
                category_volume_boost,
            )?));
        }

        let count = reader.read_count("variable", 19)?;
        let mut variables = Vec::with_capacity(count);
        for _ in 0..count {
            variables.push(Arc::new(Variable::read(&mut reader)?));
        }

        let count = reader.read_count("curve", 12)?;
        let mut curves = Vec::with_capacity(count);
        for _ in 0..count {
            curves.push(Arc::new(RpcCurve::read(&mut reader, &variables)?));
        }

        if reader.remaining() > 0 {
            log::debug!(
                "[Settings] {} trailing bytes after curve table",
                reader.remaining()
            );
        }

        log::info!(
            "[Settings] loaded {} categories, {} variables, {} curves",
            categories.len(),
            variables.len(),
            curves.len()
        );

        Ok(Self {
            categories,
            variables,
            curves,
        })
    }

    /// Serialize back to the settings file format
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BankWriter::new();
        writer.write_i32(SETTINGS_FORMAT_VERSION);

        writer.write_count(self.categories.len());
        for category in &self.categories {
            category.write(&mut writer);
        }

        writer.write_count(self.variables.len());
        for variable in &self.variables {
            variable.write(&mut writer);
        }

        writer.write_count(self.curves.len());
        for curve in &self.curves {
            curve.write(&mut writer);
        }

        writer.into_bytes()
    }

    pub fn category(&self, name: &str) -> CueResult<&Arc<AudioCategory>> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CueError::NotFound {
                kind: "category",
                name: name.to_string(),
            })
    }

    pub fn curve(&self, name: &str) -> CueResult<&Arc<RpcCurve>> {
        self.curves
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CueError::NotFound {
                kind: "RPC curve",
                name: name.to_string(),
            })
    }

    pub fn variable(&self, name: &str) -> CueResult<&Arc<Variable>> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| CueError::NotFound {
                kind: "variable",
                name: name.to_string(),
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
