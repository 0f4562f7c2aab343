// SPDX-FileCopyrightText: 2025 The piecewise Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use tracing::{event, Level};

use crate::block_tracker::{BlockGeometry, BlockStateTracker, RangeFilter};
use crate::errors::LayoutError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
    pub global_start_offset: u64, // Where the file starts in the concatenated stream.
}

/// Files of a multi-file download laid end to end as one byte stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLayout {
    pub files: Vec<FileEntry>,
    pub total_size: u64,
}

impl FileLayout {
    pub fn new(files: Vec<(PathBuf, u64)>) -> Self {
        let mut entries = Vec::with_capacity(files.len());
        let mut current_offset = 0;
        for (path, length) in files {
            entries.push(FileEntry {
                path,
                length,
                global_start_offset: current_offset,
            });
            current_offset += length;
        }
        Self {
            files: entries,
            total_size: current_offset,
        }
    }

    pub fn single(path: PathBuf, length: u64) -> Self {
        Self::new(vec![(path, length)])
    }

    /// `(offset, length)` of file `index` in the global stream.
    pub fn file_span(&self, index: usize) -> Result<(u64, u64), LayoutError> {
        self.files
            .get(index)
            .map(|file| (file.global_start_offset, file.length))
            .ok_or(LayoutError::UnknownFile {
                index,
                count: self.files.len(),
            })
    }

    /// Blocks holding any byte of file `index`. `None` for an empty file.
    pub fn file_blocks(
        &self,
        index: usize,
        geometry: &BlockGeometry,
    ) -> Result<Option<RangeFilter>, LayoutError> {
        let (offset, length) = self.file_span(index)?;
        Ok(RangeFilter::from_byte_range(offset, length, geometry))
    }

    /// Restricts `tracker` to the blocks of the selected files.
    ///
    /// An empty selection drops the filter so the whole stream is wanted.
    /// Blocks shared with a neighbouring unselected file are fetched whole.
    pub fn select_files(
        &self,
        tracker: &mut BlockStateTracker,
        selected: &[usize],
    ) -> Result<(), LayoutError> {
        let spans = selected
            .iter()
            .map(|&index| self.file_span(index))
            .collect::<Result<Vec<_>, _>>()?;

        tracker.clear_filter();
        if spans.is_empty() {
            return Ok(());
        }
        for (offset, length) in spans {
            tracker.add_filter(offset, length);
        }
        tracker.enable_filter();
        event!(
            Level::DEBUG,
            files = selected.len(),
            bytes = tracker.filtered_total_length(),
            "Selected files"
        );
        Ok(())
    }
}
