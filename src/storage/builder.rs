//! Parallel bulk construction of a list structure.
//!
//! The build runs in four phases on a [`TaskScheduler`]:
//!
//! 1. count list lengths per entity,
//! 2. plan each chunk: small headers, CSR offsets and large-list sizes,
//! 3. allocate page runs and populate headers and metadata, chunk by chunk
//!    in id order under an [`OrderingToken`],
//! 4. encode elements into in-memory pages, each page owned by one chunk.
//!
//! Large-list indices are rebased by a prefix sum over the chunk plans and
//! page allocation is serialised by the token, so the output is identical
//! for any thread count.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::primitives::concurrency::{OrderingToken, TaskScheduler};
use crate::storage::codec::ElementCodec;
use crate::storage::layout::PageElementLayout;
use crate::storage::list_headers::{
    make_large, make_small, ListHeader, ListHeadersBuilder, LARGE_LIST_IDX_MASK,
    SMALL_LEN_MAX, SMALL_OFFSET_MAX,
};
use crate::storage::lists::{Lists, ListsPaths};
use crate::storage::lists_metadata::ListsMetadataBuilder;
use crate::storage::manager::StorageManager;
use crate::storage::metrics::ObservabilityContext;
use crate::types::{num_chunks, EntityOffset, PageIdx, Result, StorageError, CHUNK_SIZE, PAGE_SIZE};

/// Chunk ranges handed to one task, per worker thread.
const TASKS_PER_THREAD: u64 = 4;

/// What a finished build produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Entities covered.
    pub num_entities: u64,
    /// Elements written.
    pub num_elements: u64,
    /// Chunks.
    pub num_chunks: u64,
    /// Lists stored in their own page run.
    pub num_large_lists: u64,
    /// Data pages written.
    pub data_pages: u32,
    /// Lists at least this long were made large.
    pub large_list_threshold: u32,
    /// Worker threads used.
    pub threads: usize,
}

/// Bulk loader for one list structure. Obtain it from
/// [`StorageManager::lists_builder`].
pub struct ListsBuilder<'a, C: ElementCodec> {
    manager: &'a StorageManager,
    name: String,
    codec: C,
    num_entities: u64,
    threads: usize,
    threshold: Option<u32>,
}

struct ChunkPlan {
    headers: Vec<ListHeader>,
    small_elements: u64,
    large_lens: Vec<u64>,
}

struct ChunkRuns {
    small_start: PageIdx,
    large_starts: Vec<PageIdx>,
}

struct PopulateState {
    headers: ListHeadersBuilder,
    metadata: ListsMetadataBuilder,
    next_page: u32,
}

impl<'a, C: ElementCodec> ListsBuilder<'a, C> {
    pub(crate) fn new(
        manager: &'a StorageManager,
        name: impl Into<String>,
        codec: C,
        num_entities: u64,
    ) -> Self {
        Self {
            manager,
            name: name.into(),
            codec,
            num_entities,
            threads: manager.options().builder_threads,
            threshold: manager.options().large_list_threshold,
        }
    }

    /// Overrides the worker count.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Lowers the small/large threshold.
    pub fn large_list_threshold(mut self, threshold: u32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Lists with at least this many elements become large. Never above one
    /// page worth of elements or the small header's length field.
    pub fn effective_threshold(&self) -> u32 {
        let layout = PageElementLayout::new(self.codec.element_size(), self.codec.has_null_bits());
        let natural = layout.elements_per_page().min(SMALL_LEN_MAX + 1);
        self.threshold
            .map_or(natural, |threshold| threshold.clamp(1, natural))
    }

    /// Builds the structure from `(entity, value)` pairs. Values of one
    /// entity keep their input order. Existing files of the same name are
    /// replaced.
    pub fn build(self, input: &[(EntityOffset, C::Value)]) -> Result<(Lists<C>, BuildSummary)> {
        let obs = self.manager.obs().child(&self.name);
        let span = obs.span("build");
        let _entered = span.enter();
        let started = Instant::now();

        let layout = PageElementLayout::new(self.codec.element_size(), self.codec.has_null_bits());
        let threshold = self.effective_threshold();
        let scheduler = TaskScheduler::new(self.threads);
        let num_entities = self.num_entities;
        let total_chunks = num_chunks(num_entities);
        let ranges = chunk_ranges(total_chunks, scheduler.num_threads() as u64 * TASKS_PER_THREAD);

        // Phase 1.
        let phase = Instant::now();
        let counts = count_lengths(&scheduler, &obs, input, num_entities)?;
        log_phase("count", phase);

        // Phase 2.
        let phase = Instant::now();
        let plans = {
            let counts = &counts;
            let obs = &obs;
            let tasks = ranges
                .iter()
                .cloned()
                .map(|range| {
                    move || -> Result<Vec<ChunkPlan>> {
                        let plans = range
                            .map(|chunk| plan_chunk(chunk, counts, threshold))
                            .collect::<Result<Vec<_>>>()?;
                        obs.metrics().builder_task_completed();
                        Ok(plans)
                    }
                })
                .collect();
            scheduler.run(tasks)?.into_iter().flatten().collect::<Vec<_>>()
        };
        let mut large_bases = Vec::with_capacity(plans.len());
        let mut num_large_lists = 0u64;
        for plan in &plans {
            large_bases.push(num_large_lists);
            num_large_lists += plan.large_lens.len() as u64;
        }
        if num_large_lists > u64::from(LARGE_LIST_IDX_MASK) + 1 {
            return Err(StorageError::CapacityExceeded("large list index"));
        }
        log_phase("plan", phase);

        // Phase 3.
        let phase = Instant::now();
        let bm = self.manager.buffer_manager();
        let paths = ListsPaths::new(self.manager.dir(), &self.name);
        let data_file = bm.create_file(&paths.data)?;
        let headers_file = bm.create_file(&paths.headers)?;
        let metadata_file = bm.create_file(&paths.metadata)?;

        let mut metadata = ListsMetadataBuilder::new(Arc::clone(&metadata_file))?;
        metadata.init_chunk_page_lists(total_chunks)?;
        metadata.init_large_list_page_lists(num_large_lists)?;
        let shared = Mutex::new(PopulateState {
            headers: ListHeadersBuilder::new(Arc::clone(&headers_file), num_entities)?,
            metadata,
            next_page: 0,
        });
        let token = OrderingToken::new();
        let runs = {
            let (plans, large_bases, shared, token, obs) =
                (&plans, &large_bases, &shared, &token, &obs);
            let tasks = ranges
                .iter()
                .cloned()
                .map(|range| {
                    move || -> Result<Vec<ChunkRuns>> {
                        let result = range
                            .map(|chunk| {
                                populate_chunk(
                                    chunk,
                                    &plans[chunk as usize],
                                    large_bases[chunk as usize],
                                    &layout,
                                    shared,
                                    token,
                                )
                            })
                            .collect::<Result<Vec<_>>>();
                        if result.is_err() {
                            token.poison();
                        } else {
                            obs.metrics().builder_task_completed();
                        }
                        result
                    }
                })
                .collect();
            scheduler.run(tasks)?.into_iter().flatten().collect::<Vec<_>>()
        };
        let PopulateState {
            headers,
            metadata,
            next_page: data_pages,
        } = shared.into_inner();
        log_phase("populate", phase);

        // Phase 4.
        let phase = Instant::now();
        let pages: Vec<Mutex<Box<[u8]>>> = (0..data_pages)
            .map(|_| Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
            .collect();
        let (starts, order) = group_by_entity(input, &counts);
        let single = TaskScheduler::new(1);
        let writer = if self.codec.uses_overflow() {
            &single
        } else {
            &scheduler
        };
        {
            let (plans, runs, pages, starts, order, codec, obs) =
                (&plans, &runs, &pages, &starts, &order, &self.codec, &obs);
            let tasks = ranges
                .iter()
                .cloned()
                .map(|range| {
                    move || -> Result<()> {
                        for chunk in range {
                            let plan = &plans[chunk as usize];
                            let run = &runs[chunk as usize];
                            let first_entity = chunk * CHUNK_SIZE;
                            let mut large = 0usize;
                            for (i, header) in plan.headers.iter().enumerate() {
                                let entity = first_entity + i as u64;
                                let (run_start, base) = match *header {
                                    ListHeader::Small { csr_offset, .. } => {
                                        (run.small_start, u64::from(csr_offset))
                                    }
                                    ListHeader::Large { .. } => {
                                        large += 1;
                                        (run.large_starts[large - 1], 0)
                                    }
                                };
                                let values = &order[starts[entity as usize] as usize
                                    ..starts[entity as usize + 1] as usize];
                                for (k, &input_idx) in values.iter().enumerate() {
                                    let cursor = layout.cursor_for(base + k as u64);
                                    let page = &pages[(run_start + cursor.page_idx) as usize];
                                    let mut bytes = page.lock();
                                    codec.encode(
                                        &input[input_idx as usize].1,
                                        &mut bytes[layout.element_range(cursor.pos_in_page)],
                                    )?;
                                }
                            }
                        }
                        obs.metrics().builder_task_completed();
                        Ok(())
                    }
                })
                .collect();
            writer.run(tasks)?;
        }
        log_phase("write", phase);

        // Save.
        data_file.reserve_pages(data_pages);
        for (page_idx, page) in pages.into_iter().enumerate() {
            bm.pin(&data_file, page_idx as PageIdx)?
                .write()
                .copy_from_slice(&page.into_inner());
        }
        headers.save_to_disk(bm)?;
        metadata.save_to_disk(bm)?;
        for file in [&data_file, &headers_file, &metadata_file] {
            bm.flush_file(file)?;
            file.checkpoint_page_count();
            bm.discard_file(file);
        }
        self.codec.flush()?;

        let summary = BuildSummary {
            num_entities,
            num_elements: input.len() as u64,
            num_chunks: total_chunks,
            num_large_lists,
            data_pages,
            large_list_threshold: threshold,
            threads: scheduler.num_threads(),
        };
        info!(
            lists = %self.name,
            entities = summary.num_entities,
            elements = summary.num_elements,
            large = summary.num_large_lists,
            pages = summary.data_pages,
            threads = summary.threads,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "lists.builder.done"
        );
        let lists = self.manager.open_lists(&self.name, self.codec)?;
        Ok((lists, summary))
    }
}

fn log_phase(phase: &'static str, started: Instant) {
    debug!(phase, elapsed_us = started.elapsed().as_micros() as u64, "lists.builder.phase");
}

/// Splits `0..num_chunks` into at most `parts` contiguous ranges.
fn chunk_ranges(num_chunks: u64, parts: u64) -> Vec<Range<u64>> {
    if num_chunks == 0 {
        return Vec::new();
    }
    let step = num_chunks.div_ceil(parts.max(1));
    (0..num_chunks)
        .step_by(step as usize)
        .map(|start| start..(start + step).min(num_chunks))
        .collect()
}

fn count_lengths<V: Sync>(
    scheduler: &TaskScheduler,
    obs: &ObservabilityContext,
    input: &[(EntityOffset, V)],
    num_entities: u64,
) -> Result<Vec<u64>> {
    let counts: Vec<AtomicU64> = (0..num_entities).map(|_| AtomicU64::new(0)).collect();
    let slice_len = input.len().div_ceil(scheduler.num_threads()).max(1);
    {
        let counts = &counts;
        let tasks = input
            .chunks(slice_len)
            .map(|slice| {
                move || -> Result<()> {
                    for &(offset, _) in slice {
                        let count = usize::try_from(offset)
                            .ok()
                            .and_then(|idx| counts.get(idx))
                            .ok_or_else(|| {
                                StorageError::out_of_bounds("entity", offset, num_entities)
                            })?;
                        count.fetch_add(1, Ordering::Relaxed);
                    }
                    obs.metrics().builder_task_completed();
                    Ok(())
                }
            })
            .collect();
        scheduler.run(tasks)?;
    }
    Ok(counts.into_iter().map(AtomicU64::into_inner).collect())
}

fn plan_chunk(chunk: u64, counts: &[u64], threshold: u32) -> Result<ChunkPlan> {
    let first = (chunk * CHUNK_SIZE) as usize;
    let last = (first + CHUNK_SIZE as usize).min(counts.len());
    let mut plan = ChunkPlan {
        headers: Vec::with_capacity(last - first),
        small_elements: 0,
        large_lens: Vec::new(),
    };
    for &len in &counts[first..last] {
        if len >= u64::from(threshold) {
            plan.headers.push(ListHeader::Large {
                idx: plan.large_lens.len() as u32,
            });
            plan.large_lens.push(len);
        } else {
            let csr_offset = u32::try_from(plan.small_elements)
                .ok()
                .filter(|&csr| csr <= SMALL_OFFSET_MAX)
                .ok_or(StorageError::CapacityExceeded("small list CSR offset"))?;
            plan.headers.push(ListHeader::Small {
                csr_offset,
                len: len as u32,
            });
            plan.small_elements += len;
        }
    }
    Ok(plan)
}

fn populate_chunk(
    chunk: u64,
    plan: &ChunkPlan,
    large_base: u64,
    layout: &PageElementLayout,
    shared: &Mutex<PopulateState>,
    token: &OrderingToken,
) -> Result<ChunkRuns> {
    token.wait_for_turn(chunk)?;
    let runs = {
        let mut state = shared.lock();
        let small_pages = layout.pages_for(plan.small_elements);
        let small_start = alloc_pages(&mut state.next_page, small_pages)?;
        state
            .metadata
            .populate_chunk_page_list(chunk, small_pages, small_start)?;

        let mut large_starts = Vec::with_capacity(plan.large_lens.len());
        for (local, &len) in plan.large_lens.iter().enumerate() {
            let pages = layout.pages_for(len);
            let start = alloc_pages(&mut state.next_page, pages)?;
            state.metadata.populate_large_list_page_list(
                large_base + local as u64,
                pages,
                len,
                start,
            )?;
            large_starts.push(start);
        }

        let first_entity = chunk * CHUNK_SIZE;
        for (i, header) in plan.headers.iter().enumerate() {
            let word = match *header {
                ListHeader::Small { csr_offset, len } => make_small(csr_offset, len),
                ListHeader::Large { idx } => make_large((large_base + u64::from(idx)) as u32),
            };
            state.headers.set_header(first_entity + i as u64, word)?;
        }
        ChunkRuns {
            small_start,
            large_starts,
        }
    };
    token.advance(chunk);
    Ok(runs)
}

fn alloc_pages(next_page: &mut u32, pages: u32) -> Result<PageIdx> {
    let start = *next_page;
    *next_page = start
        .checked_add(pages)
        .ok_or(StorageError::CapacityExceeded("data file pages"))?;
    Ok(start)
}

/// Stable counting sort of input positions by entity. Returns per-entity
/// start positions (with a trailing total) and the sorted positions.
fn group_by_entity<V>(input: &[(EntityOffset, V)], counts: &[u64]) -> (Vec<u64>, Vec<u64>) {
    let mut starts = Vec::with_capacity(counts.len() + 1);
    let mut total = 0u64;
    for &count in counts {
        starts.push(total);
        total += count;
    }
    starts.push(total);
    let mut cursor = starts.clone();
    let mut order = vec![0u64; input.len()];
    for (idx, (offset, _)) in input.iter().enumerate() {
        let slot = &mut cursor[*offset as usize];
        order[*slot as usize] = idx as u64;
        *slot += 1;
    }
    (starts, order)
}
