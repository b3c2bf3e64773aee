//! Raw component data traversal for binary serialization collaborators.
//!
//! The engine does not define a wire format. It defines the traversal: a
//! writer is handed every component column field-by-field as raw bytes with
//! a type tag, and a reader hands them back in the same order. Trivially
//! copyable values are transferred as their in-memory bytes at their natural
//! alignment; container-like component types require element-wise recursion
//! (a length prefix followed by each element) which is the collaborator's
//! concern, so the walkers here reject components with drop obligations
//! rather than guessing at their layout.

use crate::storage::ComponentTypeId;
use crate::world::World;
use thiserror::Error;

/// The tag attached to entity handle columns, distinct from every component
/// tag.
pub const ENTITY_TAG: u32 = u32::MAX;

/// An error which may occur while saving or loading component data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializeError {
    /// The component type has drop obligations and cannot be transferred as
    /// raw bytes.
    #[error("component {0} is not trivially copyable")]
    NonTrivial(ComponentTypeId),
    /// A seek target lies outside the written region.
    #[error("position {pos} out of bounds (len {len})")]
    OutOfBounds {
        /// The requested position.
        pos: usize,
        /// The written length.
        len: usize,
    },
    /// The reader encountered a record with an unexpected type tag.
    #[error("type tag mismatch: expected {expected}, found {found}")]
    TagMismatch {
        /// The tag the traversal expected.
        expected: u32,
        /// The tag found in the stream.
        found: u32,
    },
    /// The reader ran out of data mid-record.
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

/// A destination for raw component bytes.
pub trait RawWrite {
    /// Appends one record of raw bytes under the given type tag.
    fn save_raw(&mut self, bytes: &[u8], type_tag: u32) -> Result<(), SerializeError>;

    /// The current stream position.
    fn tell(&self) -> usize;

    /// Moves the stream position.
    fn seek(&mut self, pos: usize) -> Result<(), SerializeError>;

    /// Rewinds the stream to its start.
    fn reset(&mut self);
}

/// A source of raw component bytes.
pub trait RawRead {
    /// Reads one record of raw bytes, verifying its type tag.
    fn load_raw(&mut self, out: &mut [u8], type_tag: u32) -> Result<(), SerializeError>;

    /// The current stream position.
    fn tell(&self) -> usize;

    /// Moves the stream position.
    fn seek(&mut self, pos: usize) -> Result<(), SerializeError>;

    /// Rewinds the stream to its start.
    fn reset(&mut self);
}

/// An in-memory implementation of [RawWrite] and [RawRead].
///
/// Records are stored as a tag and length header followed by the bytes;
/// this is this buffer's own format, not a contract of the traversal.
#[derive(Default)]
pub struct RawBuffer {
    bytes: Vec<u8>,
    pos: usize,
}

impl RawBuffer {
    /// Constructs an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The number of bytes written.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl RawWrite for RawBuffer {
    fn save_raw(&mut self, bytes: &[u8], type_tag: u32) -> Result<(), SerializeError> {
        self.bytes.truncate(self.pos);
        self.bytes.extend_from_slice(&type_tag.to_le_bytes());
        self.bytes
            .extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.bytes.extend_from_slice(bytes);
        self.pos = self.bytes.len();
        Ok(())
    }

    fn tell(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<(), SerializeError> {
        if pos > self.bytes.len() {
            return Err(SerializeError::OutOfBounds {
                pos,
                len: self.bytes.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

impl RawRead for RawBuffer {
    fn load_raw(&mut self, out: &mut [u8], type_tag: u32) -> Result<(), SerializeError> {
        let header = 4 + 8;
        if self.pos + header > self.bytes.len() {
            return Err(SerializeError::UnexpectedEof);
        }

        let mut tag = [0u8; 4];
        tag.copy_from_slice(&self.bytes[self.pos..self.pos + 4]);
        let tag = u32::from_le_bytes(tag);
        if tag != type_tag {
            return Err(SerializeError::TagMismatch {
                expected: type_tag,
                found: tag,
            });
        }

        let mut len = [0u8; 8];
        len.copy_from_slice(&self.bytes[self.pos + 4..self.pos + header]);
        let len = u64::from_le_bytes(len) as usize;
        if len != out.len() || self.pos + header + len > self.bytes.len() {
            return Err(SerializeError::UnexpectedEof);
        }

        out.copy_from_slice(&self.bytes[self.pos + header..self.pos + header + len]);
        self.pos += header + len;
        Ok(())
    }

    fn tell(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<(), SerializeError> {
        if pos > self.bytes.len() {
            return Err(SerializeError::OutOfBounds {
                pos,
                len: self.bytes.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

/// Walks every occupied chunk of the world, handing each entity handle
/// column, component column and per-chunk slot to the writer in a
/// deterministic order.
pub fn save_components(world: &World, writer: &mut impl RawWrite) -> Result<(), SerializeError> {
    for archetype in world.archetypes().iter() {
        let layout = archetype.layout();
        for chunk in archetype.chunks() {
            let rows = chunk.len() as usize;

            // Safety: the entity column holds `rows` initialized handles.
            let entities = unsafe {
                std::slice::from_raw_parts(
                    chunk.base(),
                    rows * std::mem::size_of::<crate::entity::Entity>(),
                )
            };
            writer.save_raw(entities, ENTITY_TAG)?;

            for col in layout.entity_comps() {
                if !col.meta.is_trivial() {
                    return Err(SerializeError::NonTrivial(
                        world.registry().info(col.comp).type_id(),
                    ));
                }
                // Safety: the column's occupied prefix holds initialized
                // values; trivially copyable values are valid as raw bytes.
                let bytes = unsafe {
                    std::slice::from_raw_parts(
                        chunk.column_ptr(col.offset, col.meta.size(), 0),
                        rows * col.meta.size(),
                    )
                };
                writer.save_raw(bytes, col.comp.0)?;
            }

            for slot in layout.chunk_comps() {
                if !slot.meta.is_trivial() {
                    return Err(SerializeError::NonTrivial(
                        world.registry().info(slot.comp).type_id(),
                    ));
                }
                // Safety: chunk slots are constructed when a chunk opens.
                let bytes = unsafe {
                    std::slice::from_raw_parts(
                        chunk.base().add(slot.offset as usize),
                        slot.meta.size(),
                    )
                };
                writer.save_raw(bytes, slot.comp.0)?;
            }
        }
    }
    Ok(())
}

/// Walks the world in the same order as [save_components], loading each
/// record back into place. The world must be structurally identical to the
/// one that produced the stream.
pub fn load_components(world: &mut World, reader: &mut impl RawRead) -> Result<(), SerializeError> {
    let (registry, archetypes) = world.storage_mut();
    for archetype in archetypes.as_mut_slice() {
        let (layout, chunks) = archetype.layout_and_chunks_mut();
        for chunk in chunks {
            let rows = chunk.len() as usize;

            // Safety: same extents as the save walk; entity handles are
            // plain bytes.
            let entities = unsafe {
                std::slice::from_raw_parts_mut(
                    chunk.base(),
                    rows * std::mem::size_of::<crate::entity::Entity>(),
                )
            };
            reader.load_raw(entities, ENTITY_TAG)?;

            for col in layout.entity_comps() {
                if !col.meta.is_trivial() {
                    return Err(SerializeError::NonTrivial(registry.info(col.comp).type_id()));
                }
                // Safety: overwriting trivially copyable values with bytes
                // produced from values of the same type is valid.
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(
                        chunk.column_ptr(col.offset, col.meta.size(), 0),
                        rows * col.meta.size(),
                    )
                };
                reader.load_raw(bytes, col.comp.0)?;
            }

            for slot in layout.chunk_comps() {
                if !slot.meta.is_trivial() {
                    return Err(SerializeError::NonTrivial(
                        registry.info(slot.comp).type_id(),
                    ));
                }
                // Safety: the slot holds one trivially copyable value.
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(
                        chunk.base().add(slot.offset as usize),
                        slot.meta.size(),
                    )
                };
                reader.load_raw(bytes, slot.comp.0)?;
            }
        }
    }
    Ok(())
}
