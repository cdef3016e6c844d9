//! Descriptor set bookkeeping for backends with descriptor sets.
//!
//! Vulkan descriptor sets are opaque to the layer once written, and OpenGL has
//! no descriptor sets at all. Both backends therefore keep a
//! [`DescriptorSetRecord`]: the binding layout plus a flat array of the
//! descriptor values last written, so add-ons can query what a set contains
//! and OpenGL can replay a set as individual bind calls.

use crate::error::{ApiError, ApiResult};
use crate::handle::{DescriptorSetLayout, Resource, ResourceView, Sampler};
use crate::pipeline::{DescriptorSetLayoutDesc, DescriptorType};

/// Value stored in one descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DescriptorValue {
    #[default]
    Empty,
    Sampler(Sampler),
    SamplerWithView {
        sampler: Sampler,
        view: ResourceView,
    },
    View(ResourceView),
    Buffer {
        resource: Resource,
        offset: u64,
        size: u64,
    },
}

impl DescriptorValue {
    /// Returns `true` if the value can be stored in a slot of type `ty`.
    pub fn matches(&self, ty: DescriptorType) -> bool {
        match self {
            DescriptorValue::Empty => true,
            DescriptorValue::Sampler(_) => ty == DescriptorType::Sampler,
            DescriptorValue::SamplerWithView { .. } => ty == DescriptorType::SamplerWithResourceView,
            DescriptorValue::View(_) => matches!(
                ty,
                DescriptorType::ShaderResourceView | DescriptorType::UnorderedAccessView
            ),
            DescriptorValue::Buffer { .. } => matches!(
                ty,
                DescriptorType::ConstantBuffer
                    | DescriptorType::ShaderResourceView
                    | DescriptorType::UnorderedAccessView
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BindingSlot {
    binding: u32,
    ty: DescriptorType,
    offset: usize,
    count: u32,
}

/// Layout record: resolves binding numbers to slots of the flat value array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutRecord {
    desc: DescriptorSetLayoutDesc,
    slots: Vec<BindingSlot>,
    total: usize,
}

impl DescriptorSetLayoutRecord {
    pub fn new(desc: DescriptorSetLayoutDesc) -> Self {
        let mut slots = Vec::with_capacity(desc.ranges.len());
        let mut total = 0usize;
        for range in &desc.ranges {
            slots.push(BindingSlot {
                binding: range.binding,
                ty: range.ty,
                offset: total,
                count: range.count,
            });
            total += range.count as usize;
        }
        slots.sort_by_key(|slot| slot.binding);
        Self { desc, slots, total }
    }

    pub fn desc(&self) -> &DescriptorSetLayoutDesc {
        &self.desc
    }

    /// Total number of descriptor slots.
    pub fn total_count(&self) -> usize {
        self.total
    }

    /// Descriptor type of `binding`.
    pub fn binding_type(&self, binding: u32) -> Option<DescriptorType> {
        self.slot(binding).map(|slot| slot.ty)
    }

    fn slot(&self, binding: u32) -> Option<&BindingSlot> {
        self.slots
            .binary_search_by_key(&binding, |slot| slot.binding)
            .ok()
            .map(|index| &self.slots[index])
    }
}

/// Contents of one descriptor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetRecord {
    layout: DescriptorSetLayout,
    slots: Vec<BindingSlot>,
    values: Vec<DescriptorValue>,
}

impl DescriptorSetRecord {
    /// Create an empty set for `layout`.
    pub fn new(layout: DescriptorSetLayout, record: &DescriptorSetLayoutRecord) -> Self {
        Self {
            layout,
            slots: record.slots.clone(),
            values: vec![DescriptorValue::Empty; record.total],
        }
    }

    pub fn layout(&self) -> DescriptorSetLayout {
        self.layout
    }

    /// Write `values` starting at `array_offset` within `binding`.
    ///
    /// Writes that overrun a binding continue into the following bindings, in
    /// binding order, as long as those have the same descriptor type.
    pub fn write(
        &mut self,
        binding: u32,
        array_offset: u32,
        values: &[DescriptorValue],
    ) -> ApiResult<()> {
        let start = self
            .slots
            .iter()
            .position(|slot| slot.binding == binding)
            .ok_or_else(|| {
                ApiError::InvalidParameter(format!("binding {} not in layout", binding))
            })?;
        let ty = self.slots[start].ty;
        if let Some(value) = values.iter().find(|value| !value.matches(ty)) {
            return Err(ApiError::InvalidParameter(format!(
                "{:?} cannot be written to a {:?} binding",
                value, ty
            )));
        }

        let mut remaining = values;
        let mut element = array_offset;
        for slot in &self.slots[start..] {
            if remaining.is_empty() {
                break;
            }
            if slot.ty != ty {
                break;
            }
            if element >= slot.count {
                element -= slot.count;
                continue;
            }
            let room = (slot.count - element) as usize;
            let take = room.min(remaining.len());
            let first = slot.offset + element as usize;
            self.values[first..first + take].copy_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            element = 0;
        }

        if remaining.is_empty() {
            Ok(())
        } else {
            Err(ApiError::InvalidParameter(format!(
                "write of {} descriptors at binding {} overruns the layout",
                values.len(),
                binding
            )))
        }
    }

    /// Value at `binding[index]`.
    pub fn get(&self, binding: u32, index: u32) -> Option<&DescriptorValue> {
        let slot = self.slots.iter().find(|slot| slot.binding == binding)?;
        if index >= slot.count {
            return None;
        }
        self.values.get(slot.offset + index as usize)
    }

    /// All values in binding order.
    pub fn values(&self) -> &[DescriptorValue] {
        &self.values
    }

    /// Iterate over `(binding, type, values)` for every binding.
    pub fn bindings(&self) -> impl Iterator<Item = (u32, DescriptorType, &[DescriptorValue])> {
        self.slots.iter().map(|slot| {
            (
                slot.binding,
                slot.ty,
                &self.values[slot.offset..slot.offset + slot.count as usize],
            )
        })
    }

    /// Copy `count` descriptors from `source` into this set.
    pub fn copy_from(
        &mut self,
        source: &DescriptorSetRecord,
        source_binding: u32,
        source_offset: u32,
        dest_binding: u32,
        dest_offset: u32,
        count: u32,
    ) -> ApiResult<()> {
        let values = (0..count)
            .map(|i| {
                source
                    .get(source_binding, source_offset + i)
                    .copied()
                    .ok_or_else(|| {
                        ApiError::InvalidParameter(format!(
                            "copy source binding {} out of range",
                            source_binding
                        ))
                    })
            })
            .collect::<ApiResult<Vec<_>>>()?;
        self.write(dest_binding, dest_offset, &values)
    }

    /// Clear every slot that references `view`.
    pub fn forget_view(&mut self, view: ResourceView) {
        for value in &mut self.values {
            let references = match value {
                DescriptorValue::View(bound) => *bound == view,
                DescriptorValue::SamplerWithView { view: bound, .. } => *bound == view,
                _ => false,
            };
            if references {
                *value = DescriptorValue::Empty;
            }
        }
    }
}

/// A single descriptor write request.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorSetUpdate {
    pub set: crate::handle::DescriptorSet,
    pub binding: u32,
    pub array_offset: u32,
    pub ty: DescriptorType,
    pub values: Vec<DescriptorValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DescriptorRange, ShaderStage};

    fn layout() -> DescriptorSetLayoutRecord {
        DescriptorSetLayoutRecord::new(DescriptorSetLayoutDesc {
            ranges: vec![
                DescriptorRange {
                    binding: 0,
                    count: 1,
                    ty: DescriptorType::ConstantBuffer,
                    visibility: ShaderStage::VERTEX,
                },
                DescriptorRange {
                    binding: 1,
                    count: 2,
                    ty: DescriptorType::ShaderResourceView,
                    visibility: ShaderStage::PIXEL,
                },
                DescriptorRange {
                    binding: 2,
                    count: 2,
                    ty: DescriptorType::ShaderResourceView,
                    visibility: ShaderStage::PIXEL,
                },
            ],
            push_descriptors: false,
        })
    }

    #[test]
    fn test_write_and_read_back() {
        let layout = layout();
        assert_eq!(layout.total_count(), 5);
        let mut set = DescriptorSetRecord::new(DescriptorSetLayout(1), &layout);
        set.write(1, 1, &[DescriptorValue::View(ResourceView(7))]).unwrap();
        assert_eq!(set.get(1, 1), Some(&DescriptorValue::View(ResourceView(7))));
        assert_eq!(set.get(1, 0), Some(&DescriptorValue::Empty));
        assert_eq!(set.get(1, 2), None);
    }

    #[test]
    fn test_write_rolls_over_into_next_binding() {
        let layout = layout();
        let mut set = DescriptorSetRecord::new(DescriptorSetLayout(1), &layout);
        let views: Vec<_> = (1..=3).map(|v| DescriptorValue::View(ResourceView(v))).collect();
        set.write(1, 1, &views).unwrap();
        assert_eq!(set.get(2, 0), Some(&DescriptorValue::View(ResourceView(2))));
        assert_eq!(set.get(2, 1), Some(&DescriptorValue::View(ResourceView(3))));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let layout = layout();
        let mut set = DescriptorSetRecord::new(DescriptorSetLayout(1), &layout);
        let result = set.write(0, 0, &[DescriptorValue::Sampler(Sampler(3))]);
        assert!(matches!(result, Err(ApiError::InvalidParameter(_))));
        assert!(set.write(9, 0, &[]).is_err());
    }

    #[test]
    fn test_copy_and_forget() {
        let layout = layout();
        let mut source = DescriptorSetRecord::new(DescriptorSetLayout(1), &layout);
        source.write(2, 0, &[DescriptorValue::View(ResourceView(5))]).unwrap();
        let mut dest = DescriptorSetRecord::new(DescriptorSetLayout(1), &layout);
        dest.copy_from(&source, 2, 0, 1, 0, 1).unwrap();
        assert_eq!(dest.get(1, 0), Some(&DescriptorValue::View(ResourceView(5))));
        dest.forget_view(ResourceView(5));
        assert_eq!(dest.get(1, 0), Some(&DescriptorValue::Empty));
    }
}
