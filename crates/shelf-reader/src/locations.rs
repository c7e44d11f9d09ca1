//! Location index for continuously flowing documents
//!
//! The indexing pass partitions a book's text into evenly sized slots so a
//! stored percentage can be turned back into a location token, and a token
//! into a position. Tokens use a reduced CFI form,
//! `epubcfi(/6/{2 * (spine + 1)}!/4:{offset})`, where `offset` counts text
//! characters from the start of the spine item.

use crate::types::LocationToken;

/// A character offset inside one spine item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentPoint {
    pub spine_index: usize,
    pub offset: usize,
}

impl ContentPoint {
    pub fn new(spine_index: usize, offset: usize) -> Self {
        Self {
            spine_index,
            offset,
        }
    }

    pub fn to_token(self) -> LocationToken {
        LocationToken(format!(
            "epubcfi(/6/{}!/4:{})",
            (self.spine_index + 1) * 2,
            self.offset
        ))
    }

    pub fn parse(token: &LocationToken) -> Option<Self> {
        let inner = token
            .as_str()
            .trim()
            .strip_prefix("epubcfi(")?
            .strip_suffix(')')?;
        let (package, content) = inner.split_once('!')?;

        let step: usize = package.strip_prefix("/6/")?.parse().ok()?;
        if step < 2 || step % 2 != 0 {
            return None;
        }

        let offset = match content.split_once(':') {
            Some((_, offset)) => offset.parse().ok()?,
            None => 0,
        };

        Some(Self::new(step / 2 - 1, offset))
    }
}

/// Ordered slots produced by an indexing pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationIndex {
    points: Vec<ContentPoint>,
}

impl LocationIndex {
    pub fn new(mut points: Vec<ContentPoint>) -> Self {
        points.sort_unstable();
        points.dedup();
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, slot: usize) -> Option<ContentPoint> {
        self.points.get(slot).copied()
    }

    /// Slot containing `token`: the last slot at or before it
    pub fn position_of(&self, token: &LocationToken) -> Option<usize> {
        let point = ContentPoint::parse(token)?;
        self.slot_of(point)
    }

    pub fn slot_of(&self, point: ContentPoint) -> Option<usize> {
        let after = self.points.partition_point(|p| *p <= point);
        after.checked_sub(1)
    }

    /// `position / total`, always below 1
    pub fn fraction_of(&self, token: &LocationToken) -> Option<f64> {
        let slot = self.position_of(token)?;
        Some(slot as f64 / self.len() as f64)
    }

    /// Token of the slot covering `fraction` of the book
    pub fn token_at(&self, fraction: f64) -> Option<LocationToken> {
        if self.points.is_empty() || !fraction.is_finite() {
            return None;
        }
        let slot = (fraction.clamp(0.0, 1.0) * self.len() as f64).floor() as usize;
        let slot = slot.min(self.len() - 1);
        Some(self.points[slot].to_token())
    }
}

/// Partition spine items of the given text lengths into roughly `target` slots
pub fn build_index(spine_lengths: &[usize], target: usize) -> LocationIndex {
    let total: usize = spine_lengths.iter().sum();
    let chunk = (total / target.max(1)).max(1);

    let mut points = Vec::with_capacity(target.min(total.max(spine_lengths.len())));
    for (spine_index, &len) in spine_lengths.iter().enumerate() {
        let mut offset = 0;
        loop {
            points.push(ContentPoint::new(spine_index, offset));
            offset += chunk;
            if offset >= len {
                break;
            }
        }
    }

    LocationIndex::new(points)
}

/// Indexing pass with one re-run when the first pass under-shoots
///
/// A pass that yields fewer than `rerun_threshold * target` slots is repeated
/// with the target scaled up by the shortfall; the denser result wins.
pub fn index_locations(spine_lengths: &[usize], target: usize, rerun_threshold: f64) -> LocationIndex {
    let first = build_index(spine_lengths, target);
    let wanted = target as f64 * rerun_threshold;

    if (first.len() as f64) >= wanted || first.is_empty() {
        return first;
    }

    let scaled = (target as f64 * target as f64 / first.len() as f64).ceil() as usize;
    log::debug!(
        "Location index under-shot ({} of {} slots), re-running with target {}",
        first.len(),
        target,
        scaled
    );
    let second = build_index(spine_lengths, scaled);
    if second.len() > first.len() { second } else { first }
}
