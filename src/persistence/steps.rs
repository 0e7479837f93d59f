//! Built-in loader/saver steps for region documents.
//!
//! Steps run in registration order; the loader gives each one the region,
//! the document and the `generated` flag. The standard order is slices,
//! tile entities, entities, structures, so later steps can rely on the
//! slice grid being populated.

use crate::constants::world::{REGION_AREA, REGION_SIZE, SLICE_AREA, SLICE_SIZE};
use crate::persistence::{corrupted, Document, PersistenceResult, Value};
use crate::world::entity::EntityData;
use crate::world::region::Region;
use crate::world::slice::Slice;
use crate::world::structure::QueuedStructure;
use crate::world::tile::{TileId, WallId};
use crate::world::tile_entity::TileEntityData;

/// One step of the region load/save pipeline.
///
/// `load` reads its keys out of `doc` into the region; `save` writes them.
/// `generated` reports whether the region data is (being) generated, for
/// steps that store generation-dependent content. Steps must tolerate their
/// keys being absent (an older or partially-written world).
pub trait RegionIoStep: Send + Sync {
    fn load(&self, region: &Region, doc: &Document, generated: bool) -> PersistenceResult<()>;
    fn save(&self, region: &Region, doc: &mut Document, generated: bool) -> PersistenceResult<()>;
}

const TILES_PER_REGION: usize = REGION_AREA * SLICE_AREA;

/// Persists the dense slice tables under the `slices` key: tile ids, wall
/// ids and light bytes, slice-major in region order, row-major within each
/// slice.
pub struct SliceStep;

impl RegionIoStep for SliceStep {
    fn load(&self, region: &Region, doc: &Document, _generated: bool) -> PersistenceResult<()> {
        let slices = match doc.get("slices") {
            Some(Value::Map(m)) => m,
            Some(_) => return Err(corrupted("'slices' entry has the wrong shape")),
            None => return Ok(()),
        };
        let tiles = slices.get_u16_row("tiles")?;
        let walls = slices.get_u16_row("walls")?;
        let light = slices.get_bytes("light")?;
        if tiles.len() != TILES_PER_REGION
            || walls.len() != TILES_PER_REGION
            || light.len() != TILES_PER_REGION
        {
            return Err(corrupted(format!(
                "slice tables have {} / {} / {} entries, expected {}",
                tiles.len(),
                walls.len(),
                light.len(),
                TILES_PER_REGION
            )));
        }

        for index in 0..REGION_AREA {
            let base = index * SLICE_AREA;
            let slice = Slice::from_rows(
                tiles[base..base + SLICE_AREA]
                    .iter()
                    .map(|&id| TileId(id))
                    .collect(),
                walls[base..base + SLICE_AREA]
                    .iter()
                    .map(|&id| WallId(id))
                    .collect(),
                light[base..base + SLICE_AREA].to_vec(),
            );
            region.with_slice_mut(index % REGION_SIZE, index / REGION_SIZE, |s| *s = slice);
        }
        Ok(())
    }

    fn save(&self, region: &Region, doc: &mut Document, _generated: bool) -> PersistenceResult<()> {
        let mut tiles = Vec::with_capacity(TILES_PER_REGION);
        let mut walls = Vec::with_capacity(TILES_PER_REGION);
        let mut light = Vec::with_capacity(TILES_PER_REGION);
        for index in 0..REGION_AREA {
            region.with_slice(index % REGION_SIZE, index / REGION_SIZE, |s| {
                tiles.extend(s.tiles_raw());
                walls.extend(s.walls_raw());
                light.extend_from_slice(s.light_raw());
            });
        }
        let mut map = Document::new();
        map.put_u16_row("tiles", tiles);
        map.put_u16_row("walls", walls);
        map.put_bytes("light", light);
        doc.put_map("slices", map);
        Ok(())
    }
}

/// Persists tile entities under the `tileEntities` key, one mapping per
/// entity with slice/tile coordinates, the `type` discriminator and the
/// opaque payload as JSON text.
pub struct TileEntityStep;

impl RegionIoStep for TileEntityStep {
    fn load(&self, region: &Region, doc: &Document, _generated: bool) -> PersistenceResult<()> {
        let list = match doc.get("tileEntities") {
            Some(Value::List(l)) => l,
            Some(_) => return Err(corrupted("'tileEntities' entry has the wrong shape")),
            None => return Ok(()),
        };
        for value in list {
            let entry = match value {
                Value::Map(m) => m,
                _ => return Err(corrupted("tile entity entry is not a mapping")),
            };
            let sx = entry.get_i32("sliceX")?;
            let sy = entry.get_i32("sliceY")?;
            let tx = entry.get_i32("tileX")?;
            let ty = entry.get_i32("tileY")?;
            if !(0..REGION_SIZE as i32).contains(&sx) || !(0..REGION_SIZE as i32).contains(&sy) {
                return Err(corrupted(format!(
                    "tile entity slice ({}, {}) outside region",
                    sx, sy
                )));
            }
            if !(0..SLICE_SIZE as i32).contains(&tx) || !(0..SLICE_SIZE as i32).contains(&ty) {
                return Err(corrupted(format!(
                    "tile entity tile ({}, {}) outside slice",
                    tx, ty
                )));
            }
            let kind = entry.get_str("type")?.to_owned();
            let payload = serde_json::from_str(entry.get_str("data")?)?;
            region.with_slice_mut(sx as usize, sy as usize, |slice| {
                let _ = slice.set_tile_entity(
                    tx as usize,
                    ty as usize,
                    Some(TileEntityData::new(kind, payload)),
                );
            });
        }
        Ok(())
    }

    fn save(&self, region: &Region, doc: &mut Document, _generated: bool) -> PersistenceResult<()> {
        let mut list = Vec::new();
        for index in 0..REGION_AREA {
            let (sx, sy) = (index % REGION_SIZE, index / REGION_SIZE);
            region.with_slice(sx, sy, |slice| -> PersistenceResult<()> {
                for ((tx, ty), te) in slice.tile_entities() {
                    let mut entry = Document::new();
                    entry.put_i32("sliceX", sx as i32);
                    entry.put_i32("sliceY", sy as i32);
                    entry.put_i32("tileX", tx as i32);
                    entry.put_i32("tileY", ty as i32);
                    entry.put_str("type", te.kind.clone());
                    entry.put_str("data", serde_json::to_string(&te.payload)?);
                    list.push(Value::Map(entry));
                }
                Ok(())
            })?;
        }
        doc.put_list("tileEntities", list);
        Ok(())
    }
}

/// Persists the region's bound entities under the `entities` key, one JSON
/// text per entity.
pub struct EntityStep;

impl RegionIoStep for EntityStep {
    fn load(&self, region: &Region, doc: &Document, _generated: bool) -> PersistenceResult<()> {
        let list = match doc.get("entities") {
            Some(Value::List(l)) => l,
            Some(_) => return Err(corrupted("'entities' entry has the wrong shape")),
            None => return Ok(()),
        };
        let mut entities = Vec::with_capacity(list.len());
        for value in list {
            match value {
                Value::Str(json) => {
                    let data: EntityData = serde_json::from_str(json)?;
                    entities.push(data);
                }
                _ => return Err(corrupted("entity entry is not a string")),
            }
        }
        region.push_entities(entities);
        Ok(())
    }

    fn save(&self, region: &Region, doc: &mut Document, _generated: bool) -> PersistenceResult<()> {
        let mut list = Vec::new();
        for entity in region.entities_snapshot() {
            list.push(Value::Str(serde_json::to_string(&entity)?));
        }
        doc.put_list("entities", list);
        Ok(())
    }
}

/// Persists structures still queued against the region under the
/// `structures` key, so pending cross-region placements survive an unload.
pub struct StructureStep;

impl RegionIoStep for StructureStep {
    fn load(&self, region: &Region, doc: &Document, _generated: bool) -> PersistenceResult<()> {
        let list = match doc.get("structures") {
            Some(Value::List(l)) => l,
            Some(_) => return Err(corrupted("'structures' entry has the wrong shape")),
            None => return Ok(()),
        };
        for value in list {
            let entry = match value {
                Value::Map(m) => m,
                _ => return Err(corrupted("structure entry is not a mapping")),
            };
            region.add_structure(QueuedStructure::new(
                entry.get_str("name")?,
                entry.get_i32("sliceX")? as u8,
                entry.get_i32("sliceY")? as u8,
                entry.get_i32("tileX")? as u8,
                entry.get_i32("tileY")? as u8,
                entry.get_i32("offsetX")?,
                entry.get_i32("offsetY")?,
            ));
        }
        Ok(())
    }

    fn save(&self, region: &Region, doc: &mut Document, _generated: bool) -> PersistenceResult<()> {
        let mut list = Vec::new();
        for s in region.snapshot_structures() {
            let mut entry = Document::new();
            entry.put_str("name", s.name.clone());
            entry.put_i32("sliceX", s.slice_x as i32);
            entry.put_i32("sliceY", s.slice_y as i32);
            entry.put_i32("tileX", s.tile_x as i32);
            entry.put_i32("tileY", s.tile_y as i32);
            entry.put_i32("offsetX", s.offset_x);
            entry.put_i32("offsetY", s.offset_y);
            list.push(Value::Map(entry));
        }
        doc.put_list("structures", list);
        Ok(())
    }
}
