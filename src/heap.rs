use color_eyre::eyre::{self, eyre};
use hashbrown::HashMap;

use crate::call_frame::JvmValue;
use crate::class::Class;
use crate::descriptor::FieldType;

/// Largest array the heap will allocate, in elements.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

pub struct HeapObject<'a> {
    pub class: &'a Class<'a>,
    pub data: ObjectData<'a>,
}

/// An instance field slot: the declaring class and the field name. A field
/// hidden by a subclass keeps its own slot.
pub type FieldKey<'a> = (&'a str, &'a str);

#[derive(Clone)]
pub enum ObjectData<'a> {
    Fields(HashMap<FieldKey<'a>, JvmValue>),
    Array {
        component: FieldType<'a>,
        elements: Vec<JvmValue>,
    },
    /// UTF-16 contents of a `String` or `StringBuilder`.
    Text(Vec<u16>),
}

/// Per-run object store. A reference is the index of an object plus one, so `0`
/// is never a valid object and stands for `null`.
#[derive(Default)]
pub struct Heap<'a> {
    objects: Vec<HeapObject<'a>>,
}

impl<'a> Heap<'a> {
    pub fn new() -> Heap<'a> {
        Heap::default()
    }

    pub fn alloc(&mut self, class: &'a Class<'a>, data: ObjectData<'a>) -> usize {
        self.objects.push(HeapObject { class, data });
        self.objects.len()
    }

    pub fn get(&self, reference: usize) -> eyre::Result<&HeapObject<'a>> {
        reference
            .checked_sub(1)
            .and_then(|index| self.objects.get(index))
            .ok_or_else(|| eyre!("invalid reference {reference:#x}"))
    }

    pub fn get_mut(&mut self, reference: usize) -> eyre::Result<&mut HeapObject<'a>> {
        reference
            .checked_sub(1)
            .and_then(|index| self.objects.get_mut(index))
            .ok_or_else(|| eyre!("invalid reference {reference:#x}"))
    }
}

/// Stable per-run identity hash for `Object.hashCode` and `System.identityHashCode`.
pub fn identity_hash(reference: usize) -> i32 {
    ((reference as u32).wrapping_mul(0x9e37_79b1) >> 1) as i32
}

impl<'a> HeapObject<'a> {
    /// Reads the field `name` declared by `owner`.
    pub fn field(&self, owner: &'a str, name: &'a str) -> eyre::Result<JvmValue> {
        match &self.data {
            ObjectData::Fields(fields) => fields
                .get(&(owner, name))
                .copied()
                .ok_or_else(|| eyre!("no field {owner}.{name} on {}", self.class.name())),
            _ => Err(eyre!("{} has no fields", self.class.name())),
        }
    }

    pub fn set_field(&mut self, owner: &'a str, name: &'a str, value: JvmValue) -> eyre::Result<()> {
        let class = self.class.name();
        match &mut self.data {
            ObjectData::Fields(fields) => match fields.get_mut(&(owner, name)) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(eyre!("no field {owner}.{name} on {class}")),
            },
            _ => Err(eyre!("{class} has no fields")),
        }
    }

    pub fn text(&self) -> eyre::Result<&[u16]> {
        match &self.data {
            ObjectData::Text(text) => Ok(text),
            _ => Err(eyre!("{} is not a string", self.class.name())),
        }
    }

    pub fn text_mut(&mut self) -> eyre::Result<&mut Vec<u16>> {
        let class = self.class.name();
        match &mut self.data {
            ObjectData::Text(text) => Ok(text),
            _ => Err(eyre!("{class} is not a string")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_hashes_are_distinct_and_non_negative() {
        let hashes: Vec<i32> = (1..100).map(identity_hash).collect();
        assert!(hashes.iter().all(|hash| *hash >= 0));

        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), hashes.len());
    }
}
