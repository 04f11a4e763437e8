//! Read-only queries over the rendered tree.

use crate::quadtree::{NodeId, QuadTree};
use crate::tile::{Tile, TileState};

/// Errors returned by tile queries.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TileQueryError {
    /// More tiles cover the region than the caller allowed for.
    #[error("coverage needs more than {limit} tiles")]
    CoverageOverflow { limit: usize },
}

/// A latitude/longitude rectangle in radians. Longitudes lie in
/// `[-PI, PI]`; rectangles crossing the date line must be split by the
/// caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatLngRect {
    pub latmin: f64,
    pub latmax: f64,
    pub lngmin: f64,
    pub lngmax: f64,
}

/// Tiles drawn in the last frame, depth first.
pub fn query_tiles<T: Tile>(tree: &QuadTree<T>) -> Vec<NodeId> {
    let mut out = Vec::new();
    for root in tree.roots() {
        collect_rendered(tree, root, &mut out);
    }
    out
}

fn collect_rendered<T: Tile>(tree: &QuadTree<T>, id: NodeId, out: &mut Vec<NodeId>) {
    let Some(tile) = tree.get(id) else {
        return;
    };
    match tile.state() {
        TileState::ForRender => out.push(id),
        TileState::Active => {
            for child in tree.children(id).into_iter().flatten() {
                if tree.get(child).is_some_and(|t| t.state().is_active()) {
                    collect_rendered(tree, child, out);
                }
            }
        }
        _ => {}
    }
}

/// The deepest textured tiles, at most `max_level`, that together cover
/// `rect`. Fails when more than `limit` tiles would be needed.
pub fn coverage<T: Tile>(
    tree: &QuadTree<T>,
    rect: &LatLngRect,
    max_level: u32,
    limit: usize,
) -> Result<Vec<NodeId>, TileQueryError> {
    let mut found = Vec::new();
    for root in tree.roots() {
        check_coverage(tree, root, rect, max_level, limit, &mut found)?;
    }
    Ok(found)
}

fn check_coverage<T: Tile>(
    tree: &QuadTree<T>,
    id: NodeId,
    rect: &LatLngRect,
    max_level: u32,
    limit: usize,
    found: &mut Vec<NodeId>,
) -> Result<(), TileQueryError> {
    let Some(tile) = tree.get(id) else {
        return Ok(());
    };
    let key = tile.key();
    let (latmin, latmax) = key.lat_range();
    let (lngmin, lngmax) = key.lng_range();
    if rect.latmin >= latmax || rect.latmax <= latmin || rect.lngmin >= lngmax || rect.lngmax <= lngmin {
        return Ok(());
    }

    if key.lvl < max_level {
        let mut descended = false;
        for child in tree.children(id).into_iter().flatten() {
            if tree.get(child).is_some_and(|t| t.has_texture()) {
                check_coverage(tree, child, rect, max_level, limit, found)?;
                descended = true;
            }
        }
        if descended {
            return Ok(());
        }
    }

    if found.len() == limit {
        return Err(TileQueryError::CoverageOverflow { limit });
    }
    found.push(id);
    Ok(())
}

/// Deepest valid tile, at most `max_level`, containing the point. With
/// `own_texture` only tiles with a texture of their own qualify.
pub fn search_tile<T: Tile>(
    tree: &QuadTree<T>,
    lat: f64,
    lng: f64,
    max_level: u32,
    own_texture: bool,
) -> Option<NodeId> {
    let root = tree.roots()[usize::from(lng >= 0.0)];
    search_from(tree, root, lat, lng, max_level, own_texture)
}

fn search_from<T: Tile>(
    tree: &QuadTree<T>,
    id: NodeId,
    lat: f64,
    lng: f64,
    max_level: u32,
    own_texture: bool,
) -> Option<NodeId> {
    let tile = tree.get(id)?;
    if own_texture && !tile.has_own_texture() {
        return None;
    }
    if !tile.state().is_valid() {
        return None;
    }
    let key = tile.key();
    if key.lvl == max_level {
        return Some(id);
    }

    let (latmin, latmax) = key.lat_range();
    let (lngmin, lngmax) = key.lng_range();
    let mut quadrant = 0;
    if lng > (lngmin + lngmax) * 0.5 {
        quadrant += 1;
    }
    if lat < (latmin + latmax) * 0.5 {
        quadrant += 2;
    }
    tree.child(id, quadrant)
        .and_then(|child| search_from(tree, child, lat, lng, max_level, own_texture))
        .or(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadtree::tests::{add_children, test_tree};

    #[test]
    fn test_query_collects_rendered_leaves() {
        let mut tree = test_tree(TileState::ForRender);
        let east = tree.roots()[1];
        tree.get_mut(east).unwrap().core.state = TileState::Active;
        let kids = add_children(&mut tree, east, TileState::ForRender);
        tree.get_mut(kids[2]).unwrap().core.state = TileState::Invisible;
        tree.get_mut(kids[3]).unwrap().core.state = TileState::Active;
        let grandkids = add_children(&mut tree, kids[3], TileState::ForRender);

        let tiles = query_tiles(&tree);
        assert_eq!(tiles.len(), 1 + 2 + 4);
        assert!(tiles.contains(&tree.roots()[0]));
        assert!(!tiles.contains(&kids[2]));
        assert!(!tiles.contains(&kids[3]));
        assert!(grandkids.iter().all(|g| tiles.contains(g)));
    }

    #[test]
    fn test_coverage_prefers_deepest_textured_tiles() {
        let mut tree = test_tree(TileState::Active);
        let west = tree.roots()[0];
        let kids = add_children(&mut tree, west, TileState::ForRender);
        // a small rectangle inside the north-east child of the western root
        let rect = LatLngRect {
            latmin: 0.2,
            latmax: 0.4,
            lngmin: -1.0,
            lngmax: -0.8,
        };
        assert_eq!(coverage(&tree, &rect, 5, 4), Ok(vec![kids[1]]));
        assert_eq!(coverage(&tree, &rect, 0, 4), Ok(vec![west]));

        // untextured children are not descended into
        for kid in kids {
            tree.get_mut(kid).unwrap().textured = false;
        }
        assert_eq!(coverage(&tree, &rect, 5, 4), Ok(vec![west]));
    }

    #[test]
    fn test_coverage_overflow() {
        let mut tree = test_tree(TileState::Active);
        let west = tree.roots()[0];
        add_children(&mut tree, west, TileState::ForRender);
        let rect = LatLngRect {
            latmin: -1.0,
            latmax: 1.0,
            lngmin: -2.0,
            lngmax: -1.0,
        };
        assert_eq!(coverage(&tree, &rect, 3, 4).map(|v| v.len()), Ok(4));
        assert_eq!(
            coverage(&tree, &rect, 3, 3),
            Err(TileQueryError::CoverageOverflow { limit: 3 })
        );
    }

    #[test]
    fn test_search_descends_by_point() {
        let mut tree = test_tree(TileState::Active);
        let west = tree.roots()[0];
        let kids = add_children(&mut tree, west, TileState::ForRender);

        assert_eq!(search_tile(&tree, 0.3, -0.5, 5, false), Some(kids[1]));
        assert_eq!(search_tile(&tree, -0.3, -2.5, 5, false), Some(kids[2]));
        assert_eq!(search_tile(&tree, 0.3, -0.5, 0, false), Some(west));
        assert_eq!(search_tile(&tree, 0.3, 0.5, 5, false), Some(tree.roots()[1]));

        tree.get_mut(kids[1]).unwrap().textured = false;
        assert_eq!(search_tile(&tree, 0.3, -0.5, 5, true), Some(west));
        assert_eq!(search_tile(&tree, 0.3, -0.5, 5, false), Some(kids[1]));

        tree.get_mut(kids[1]).unwrap().core.state = TileState::Invalid;
        assert_eq!(search_tile(&tree, 0.3, -0.5, 5, false), Some(west));
    }
}
