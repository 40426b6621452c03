use std::fmt;

/// Maps local (process-owned plus ghost) indices to global indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMap {
    local_to_global: Vec<usize>,
}

impl IndexMap {
    pub fn new(local_to_global: Vec<usize>) -> Self {
        Self { local_to_global }
    }

    /// The map of a contiguous range of owned indices starting at `offset`.
    pub fn contiguous(offset: usize, len: usize) -> Self {
        Self::new((offset..offset + len).collect())
    }

    pub fn len(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_to_global.is_empty()
    }

    pub fn global(&self, local: usize) -> Option<usize> {
        self.local_to_global.get(local).copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.local_to_global
    }

    /// Compresses the map to one entry per block of `block_size` consecutive indices.
    ///
    /// Returns `None` if the map is not block-aligned.
    pub fn block_indices(&self, block_size: usize) -> Option<Vec<usize>> {
        if block_size == 0 || self.len() % block_size != 0 {
            return None;
        }
        self.local_to_global
            .chunks(block_size)
            .map(|chunk| {
                let first = chunk[0];
                let aligned = first % block_size == 0 && chunk.iter().enumerate().all(|(i, g)| *g == first + i);
                aligned.then(|| first / block_size)
            })
            .collect()
    }
}

/// Sizes and index map of one block row (or column) of a block system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    local_size: usize,
    global_size: usize,
    block_size: usize,
    ownership_start: usize,
    lgmap: IndexMap,
}

impl BlockLayout {
    /// A layout in which this process owns every index.
    pub fn serial(size: usize, block_size: usize) -> Self {
        Self {
            local_size: size,
            global_size: size,
            block_size: block_size.max(1),
            ownership_start: 0,
            lgmap: IndexMap::contiguous(0, size),
        }
    }

    /// A layout owning `local_size` indices starting at `ownership_start`
    /// out of `global_size`, with the given local-to-global map (owned plus ghost indices).
    pub fn distributed(
        local_size: usize,
        global_size: usize,
        block_size: usize,
        ownership_start: usize,
        lgmap: IndexMap,
    ) -> Result<Self, LayoutError> {
        if ownership_start + local_size > global_size {
            return Err(LayoutError::OwnershipOutOfRange {
                start: ownership_start,
                local_size,
                global_size,
            });
        }
        if lgmap.len() < local_size {
            return Err(LayoutError::IndexMapTooShort {
                map_len: lgmap.len(),
                local_size,
            });
        }
        if let Some(bad) = lgmap.as_slice().iter().find(|g| **g >= global_size) {
            return Err(LayoutError::GlobalIndexOutOfBounds {
                index: *bad,
                global_size,
            });
        }
        Ok(Self {
            local_size,
            global_size,
            block_size: block_size.max(1),
            ownership_start,
            lgmap,
        })
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn ownership_range(&self) -> (usize, usize) {
        (self.ownership_start, self.ownership_start + self.local_size)
    }

    pub fn lgmap(&self) -> &IndexMap {
        &self.lgmap
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    OwnershipOutOfRange {
        start: usize,
        local_size: usize,
        global_size: usize,
    },
    IndexMapTooShort {
        map_len: usize,
        local_size: usize,
    },
    GlobalIndexOutOfBounds {
        index: usize,
        global_size: usize,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OwnershipOutOfRange {
                start,
                local_size,
                global_size,
            } => write!(
                f,
                "ownership range [{}, {}) exceeds global size {}",
                start,
                start + local_size,
                global_size
            ),
            Self::IndexMapTooShort { map_len, local_size } => write!(
                f,
                "local-to-global map has {} entries but {} indices are owned",
                map_len, local_size
            ),
            Self::GlobalIndexOutOfBounds { index, global_size } => {
                write!(f, "global index {} out of bounds for global size {}", index, global_size)
            }
        }
    }
}

impl std::error::Error for LayoutError {}
