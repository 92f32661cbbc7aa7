// SPDX-License-Identifier: GPL-3.0-only

//! Named uniform storage laid out like a WGSL `var<uniform>` struct.
//!
//! Stages declare their parameters as a list of [`UniformField`]s in the same
//! order as the fields of the WGSL struct. Offsets follow the uniform address
//! space layout rules so the bytes can be written to the GPU unchanged.

use crate::errors::{RenderError, RenderResult};
use std::collections::HashMap;

/// Type of a uniform field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    fn align(&self) -> usize {
        match self {
            UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 | UniformKind::Vec4 | UniformKind::Mat4 => 16,
        }
    }

    fn size(&self) -> usize {
        match self {
            UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
        }
    }

    fn components(&self) -> usize {
        self.size() / 4
    }
}

/// One named field of a stage's parameter struct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformField {
    pub name: &'static str,
    pub kind: UniformKind,
}

impl UniformField {
    pub const fn new(name: &'static str, kind: UniformKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, Copy)]
struct Location {
    offset: usize,
    kind: UniformKind,
}

/// CPU copy of a stage's uniform buffer.
///
/// Field locations are resolved lazily by name and cached until
/// [`UniformBlock::clear_cache`] is called, which happens on every stage
/// setup.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    fields: &'static [UniformField],
    locations: HashMap<&'static str, Location>,
    data: Vec<u8>,
}

impl UniformBlock {
    pub fn new(fields: &'static [UniformField]) -> Self {
        Self {
            fields,
            locations: HashMap::new(),
            data: vec![0; layout_size(fields)],
        }
    }

    /// Buffer size in bytes, never zero so an empty block can still be bound
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn clear_cache(&mut self) {
        self.locations.clear();
    }

    /// Whether `name` has been resolved since the last cache clear
    pub fn is_cached(&self, name: &str) -> bool {
        self.locations.contains_key(name)
    }

    /// Byte offset of `name`.
    ///
    /// Unknown names are linkage errors: the stage is asking for a parameter
    /// its shader does not declare.
    pub fn offset_of(&mut self, name: &str) -> RenderResult<usize> {
        self.locate(name).map(|l| l.offset)
    }

    fn locate(&mut self, name: &str) -> RenderResult<Location> {
        if let Some(location) = self.locations.get(name) {
            return Ok(*location);
        }
        let mut offset: usize = 0;
        for field in self.fields {
            offset = offset.next_multiple_of(field.kind.align());
            if field.name == name {
                let location = Location {
                    offset,
                    kind: field.kind,
                };
                self.locations.insert(field.name, location);
                return Ok(location);
            }
            offset += field.kind.size();
        }
        Err(RenderError::linkage(
            "uniforms",
            format!("Could not get location for {}", name),
        ))
    }

    fn write(&mut self, name: &str, expected: UniformKind, values: &[f32]) -> RenderResult<()> {
        let location = self.locate(name)?;
        if location.kind != expected {
            return Err(RenderError::linkage(
                "uniforms",
                format!(
                    "{} is declared as {:?}, not {:?}",
                    name, location.kind, expected
                ),
            ));
        }
        debug_assert_eq!(values.len(), expected.components());
        let end = location.offset + values.len() * 4;
        self.data[location.offset..end].copy_from_slice(bytemuck::cast_slice(values));
        Ok(())
    }

    pub fn set_f32(&mut self, name: &str, value: f32) -> RenderResult<()> {
        self.write(name, UniformKind::Float, &[value])
    }

    pub fn set_vec2(&mut self, name: &str, value: [f32; 2]) -> RenderResult<()> {
        self.write(name, UniformKind::Vec2, &value)
    }

    pub fn set_vec3(&mut self, name: &str, value: [f32; 3]) -> RenderResult<()> {
        self.write(name, UniformKind::Vec3, &value)
    }

    pub fn set_vec4(&mut self, name: &str, value: [f32; 4]) -> RenderResult<()> {
        self.write(name, UniformKind::Vec4, &value)
    }

    /// Write a column-major 4x4 matrix
    pub fn set_mat4(&mut self, name: &str, value: &[f32; 16]) -> RenderResult<()> {
        self.write(name, UniformKind::Mat4, value)
    }

    /// Read a float back (tests and diagnostics)
    pub fn get_f32(&mut self, name: &str) -> RenderResult<f32> {
        let location = self.locate(name)?;
        Ok(bytemuck::pod_read_unaligned(
            &self.data[location.offset..location.offset + 4],
        ))
    }
}

/// Struct size following the uniform address space rules, rounded to 16
fn layout_size(fields: &[UniformField]) -> usize {
    let mut offset: usize = 0;
    for field in fields {
        offset = offset.next_multiple_of(field.kind.align());
        offset += field.kind.size();
    }
    offset.next_multiple_of(16).max(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &[UniformField] = &[
        UniformField::new("strength", UniformKind::Float),
        UniformField::new("step", UniformKind::Vec2),
        UniformField::new("tint", UniformKind::Vec3),
        UniformField::new("amount", UniformKind::Float),
        UniformField::new("transform", UniformKind::Mat4),
    ];

    #[test]
    fn test_offsets_follow_uniform_layout() {
        let mut block = UniformBlock::new(MIXED);
        assert_eq!(block.offset_of("strength").unwrap(), 0);
        assert_eq!(block.offset_of("step").unwrap(), 8);
        assert_eq!(block.offset_of("tint").unwrap(), 16);
        // A scalar packs into the tail of a vec3
        assert_eq!(block.offset_of("amount").unwrap(), 28);
        assert_eq!(block.offset_of("transform").unwrap(), 32);
        assert_eq!(block.size(), 96);
    }

    #[test]
    fn test_empty_block_is_bindable() {
        let block = UniformBlock::new(&[]);
        assert_eq!(block.size(), 16);
    }

    #[test]
    fn test_unknown_name_is_linkage_error() {
        let mut block = UniformBlock::new(MIXED);
        let err = block.set_f32("missing", 1.0).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut block = UniformBlock::new(MIXED);
        assert!(block.set_f32("step", 1.0).is_err());
    }

    #[test]
    fn test_cache_cleared_on_demand() {
        let mut block = UniformBlock::new(MIXED);
        block.set_f32("amount", 0.5).unwrap();
        assert!(block.is_cached("amount"));
        assert_eq!(block.get_f32("amount").unwrap(), 0.5);

        block.clear_cache();
        assert!(!block.is_cached("amount"));
        // Values survive; only the lookup cache is dropped
        assert_eq!(block.get_f32("amount").unwrap(), 0.5);
    }

    #[test]
    fn test_mat4_written_column_major() {
        let mut block = UniformBlock::new(MIXED);
        let mut matrix = [0.0f32; 16];
        matrix[12] = 3.0;
        block.set_mat4("transform", &matrix).unwrap();
        let bytes = &block.bytes()[32 + 48..32 + 52];
        assert_eq!(bytemuck::pod_read_unaligned::<f32>(bytes), 3.0);
    }
}
