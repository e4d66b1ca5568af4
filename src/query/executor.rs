//! Partitioned query execution.
//!
//! Partitions are the unit of parallelism: for each query the compiler runs
//! once per partition and the per-partition tasks execute on the rayon pool.
//! A coordinator merges partial results:
//!
//! - counts merge by summation;
//! - aggregations merge by additive map-merge;
//! - unordered row streams are forwarded batch-by-batch through a bounded
//!   channel (backpressure: producers block while the sink is behind);
//! - ordered row streams are sorted per partition and k-way merged.
//!
//! Cancellation and deadlines are checked at batch boundaries.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io::Write;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::bitmap::BatchedBitmapReader;
use crate::config::QueryConfig;
use crate::database::Database;
use crate::error::QueryError;
use crate::query::actions::{
    all_fields, key_for, materialize_details, merge_group_counts, resolve_fields, Action,
    CollectingSink, FastaWriter, Key, NdjsonWriter, OutputRow, QueryOutput, RecordSink,
    ResolvedField, SequenceMaterializer,
};
use crate::query::compiler::compile;
use crate::query::deadline::QueryDeadline;
use crate::query::Query;
use crate::alphabet::AmbiguityMode;
use crate::storage::DatabasePartition;

const DEFAULT_BATCH_SIZE: usize = 4096;
const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Configured entry point for query evaluation.
pub struct QueryEngine {
    batch_size: usize,
    timeout: Option<Duration>,
    channel_capacity: usize,
}

impl Default for QueryEngine {
    fn default() -> Self {
        QueryEngine {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl QueryEngine {
    pub fn new() -> Self {
        QueryEngine::default()
    }

    /// Build from configuration and size the global worker pool. The pool is
    /// process-wide; a second initialization attempt is ignored.
    pub fn from_config(config: &QueryConfig) -> Self {
        if config.worker_threads > 0 {
            let _ = rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .build_global();
        }
        let effective_threads = if config.worker_threads == 0 {
            num_cpus::get()
        } else {
            config.worker_threads
        };
        info!(threads = effective_threads, "query_pool_configured");
        QueryEngine {
            batch_size: config.batch_size.max(1),
            timeout: match config.timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    fn deadline(&self) -> QueryDeadline {
        QueryDeadline::new(self.timeout)
    }

    /// Evaluate a query, collecting the result in memory.
    pub fn execute(&self, database: &Database, query: &Query) -> Result<QueryOutput, QueryError> {
        self.execute_with_deadline(database, query, &self.deadline())
    }

    /// Evaluate a query under an externally owned deadline (for callers that
    /// keep the [`crate::query::CancelHandle`]).
    pub fn execute_with_deadline(
        &self,
        database: &Database,
        query: &Query,
        deadline: &QueryDeadline,
    ) -> Result<QueryOutput, QueryError> {
        match &query.action {
            Action::Count => {
                let count = self.execute_count(database, query, deadline)?;
                Ok(QueryOutput::Count { count })
            }
            Action::Aggregate { group_by_fields } => {
                let rows = self.execute_aggregate(database, query, group_by_fields, deadline)?;
                Ok(QueryOutput::Rows(rows))
            }
            Action::Details {
                fields,
                order_by_fields,
                limit,
                offset,
            } => {
                let rows = self.execute_details(
                    database,
                    query,
                    fields,
                    order_by_fields,
                    *limit,
                    *offset,
                    deadline,
                )?;
                Ok(QueryOutput::Rows(rows))
            }
            Action::Fasta { sequence_names } => {
                let mut sink = CollectingSink::new();
                self.stream_sequences(database, query, sequence_names, false, deadline, &mut sink)?;
                Ok(QueryOutput::Rows(sink.into_rows()))
            }
            Action::FastaAligned { sequence_names } => {
                let mut sink = CollectingSink::new();
                self.stream_sequences(database, query, sequence_names, true, deadline, &mut sink)?;
                Ok(QueryOutput::Rows(sink.into_rows()))
            }
        }
    }

    /// Evaluate a query, writing the response (NDJSON or FASTA) to `writer`.
    pub fn execute_to_writer<W: Write>(
        &self,
        database: &Database,
        query: &Query,
        writer: W,
    ) -> Result<W, QueryError> {
        let deadline = self.deadline();
        match &query.action {
            Action::Count => {
                let count = self.execute_count(database, query, &deadline)?;
                let mut sink = NdjsonWriter::new(writer);
                let mut row = OutputRow::new();
                row.insert("count".to_string(), serde_json::Value::from(count));
                sink.write_batch(vec![row])?;
                Ok(sink.into_inner())
            }
            Action::Aggregate { group_by_fields } => {
                let rows = self.execute_aggregate(database, query, group_by_fields, &deadline)?;
                let mut sink = NdjsonWriter::new(writer);
                sink.write_batch(rows)?;
                Ok(sink.into_inner())
            }
            Action::Details {
                fields,
                order_by_fields,
                limit,
                offset,
            } => {
                let mut sink = NdjsonWriter::new(writer);
                if order_by_fields.is_empty() && limit.is_none() && offset.is_none() {
                    // Unordered projection streams straight through.
                    let resolved = self.details_fields(database, fields)?;
                    self.stream_details(database, query, &resolved, &deadline, &mut sink)?;
                } else {
                    let rows = self.execute_details(
                        database,
                        query,
                        fields,
                        order_by_fields,
                        *limit,
                        *offset,
                        &deadline,
                    )?;
                    sink.write_batch(rows)?;
                }
                Ok(sink.into_inner())
            }
            Action::Fasta { sequence_names } => {
                let names = self.resolve_sequence_names(database, sequence_names)?;
                let mut sink = FastaWriter::new(
                    writer,
                    database.schema().primary_key.clone(),
                    names,
                );
                self.stream_sequences(database, query, sequence_names, false, &deadline, &mut sink)?;
                Ok(sink.into_inner())
            }
            Action::FastaAligned { sequence_names } => {
                let names = self.resolve_sequence_names(database, sequence_names)?;
                let mut sink = FastaWriter::new(
                    writer,
                    database.schema().primary_key.clone(),
                    names,
                );
                self.stream_sequences(database, query, sequence_names, true, &deadline, &mut sink)?;
                Ok(sink.into_inner())
            }
        }
    }

    fn execute_count(
        &self,
        database: &Database,
        query: &Query,
        deadline: &QueryDeadline,
    ) -> Result<u64, QueryError> {
        let partials: Vec<u64> = database
            .partitions()
            .par_iter()
            .map(|partition| -> Result<u64, QueryError> {
                deadline.check()?;
                let operator = compile(
                    &query.filter_expression,
                    database,
                    partition,
                    AmbiguityMode::None,
                )?;
                Ok(operator.evaluate().cardinality())
            })
            .collect::<Result<_, _>>()?;
        Ok(partials.into_iter().sum())
    }

    fn execute_aggregate(
        &self,
        database: &Database,
        query: &Query,
        group_by_fields: &[String],
        deadline: &QueryDeadline,
    ) -> Result<Vec<OutputRow>, QueryError> {
        let fields = resolve_fields(database, group_by_fields)?;
        let partials: Vec<HashMap<Vec<Key>, u64>> = database
            .partitions()
            .par_iter()
            .map(|partition| self.aggregate_partition(database, partition, query, &fields, deadline))
            .collect::<Result<_, _>>()?;

        let merged = partials
            .into_iter()
            .fold(HashMap::new(), merge_group_counts);

        // Deterministic output: groups ordered by key.
        let mut groups: Vec<(Vec<Key>, u64)> = merged.into_iter().collect();
        groups.sort();
        let rows = groups
            .into_iter()
            .map(|(keys, count)| {
                let mut row = OutputRow::new();
                for (field, key) in fields.iter().zip(keys.iter()) {
                    row.insert(field.0.clone(), key.to_json());
                }
                row.insert("count".to_string(), serde_json::Value::from(count));
                row
            })
            .collect();
        Ok(rows)
    }

    fn aggregate_partition(
        &self,
        database: &Database,
        partition: &DatabasePartition,
        query: &Query,
        fields: &[ResolvedField],
        deadline: &QueryDeadline,
    ) -> Result<HashMap<Vec<Key>, u64>, QueryError> {
        deadline.check()?;
        let operator = compile(
            &query.filter_expression,
            database,
            partition,
            AmbiguityMode::None,
        )?;
        let bitmap = operator.evaluate().into_owned();
        let mut groups: HashMap<Vec<Key>, u64> = HashMap::new();
        let mut reader = BatchedBitmapReader::new(bitmap, self.batch_size);
        while let Some(batch) = reader.next_batch() {
            deadline.check()?;
            for row in &batch {
                let keys: Vec<Key> = fields
                    .iter()
                    .map(|field| key_for(database, partition, field, row))
                    .collect();
                *groups.entry(keys).or_insert(0) += 1;
            }
        }
        Ok(groups)
    }

    fn details_fields(
        &self,
        database: &Database,
        fields: &[String],
    ) -> Result<Vec<ResolvedField>, QueryError> {
        if fields.is_empty() {
            Ok(all_fields(database))
        } else {
            resolve_fields(database, fields)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_details(
        &self,
        database: &Database,
        query: &Query,
        fields: &[String],
        order_by_fields: &[String],
        limit: Option<u32>,
        offset: Option<u32>,
        deadline: &QueryDeadline,
    ) -> Result<Vec<OutputRow>, QueryError> {
        let resolved = self.details_fields(database, fields)?;
        let order_fields = resolve_fields(database, order_by_fields)?;

        if order_fields.is_empty() {
            let partials: Vec<Vec<OutputRow>> = database
                .partitions()
                .par_iter()
                .map(|partition| -> Result<Vec<OutputRow>, QueryError> {
                    deadline.check()?;
                    let operator = compile(
                        &query.filter_expression,
                        database,
                        partition,
                        AmbiguityMode::None,
                    )?;
                    let bitmap = operator.evaluate().into_owned();
                    let mut rows = Vec::new();
                    let mut reader = BatchedBitmapReader::new(bitmap, self.batch_size);
                    while let Some(batch) = reader.next_batch() {
                        deadline.check()?;
                        rows.extend(materialize_details(database, partition, &resolved, &batch));
                    }
                    Ok(rows)
                })
                .collect::<Result<_, _>>()?;
            let rows = partials.into_iter().flatten();
            return Ok(apply_window(rows, offset, limit));
        }

        // Ordered: sort within each partition, then k-way merge.
        let partials: Vec<VecDeque<(Vec<Key>, OutputRow)>> = database
            .partitions()
            .par_iter()
            .map(|partition| -> Result<VecDeque<(Vec<Key>, OutputRow)>, QueryError> {
                deadline.check()?;
                let operator = compile(
                    &query.filter_expression,
                    database,
                    partition,
                    AmbiguityMode::None,
                )?;
                let bitmap = operator.evaluate().into_owned();
                let mut rows: Vec<(Vec<Key>, OutputRow)> = Vec::new();
                let mut reader = BatchedBitmapReader::new(bitmap, self.batch_size);
                while let Some(batch) = reader.next_batch() {
                    deadline.check()?;
                    let records = materialize_details(database, partition, &resolved, &batch);
                    for (row, record) in batch.iter().zip(records) {
                        let keys: Vec<Key> = order_fields
                            .iter()
                            .map(|field| key_for(database, partition, field, row))
                            .collect();
                        rows.push((keys, record));
                    }
                }
                rows.sort_by(|left, right| left.0.cmp(&right.0));
                Ok(rows.into())
            })
            .collect::<Result<_, _>>()?;

        Ok(apply_window(merge_sorted(partials), offset, limit))
    }

    /// Unordered streaming of projected rows: partition producers push
    /// batches into a bounded channel, the caller's sink drains it.
    fn stream_details(
        &self,
        database: &Database,
        query: &Query,
        fields: &[ResolvedField],
        deadline: &QueryDeadline,
        sink: &mut dyn RecordSink,
    ) -> Result<(), QueryError> {
        self.stream_batches(database, deadline, sink, |partition, emit| {
            let operator = compile(
                &query.filter_expression,
                database,
                partition,
                AmbiguityMode::None,
            )?;
            let bitmap = operator.evaluate().into_owned();
            let mut reader = BatchedBitmapReader::new(bitmap, self.batch_size);
            while let Some(batch) = reader.next_batch() {
                deadline.check()?;
                emit(materialize_details(database, partition, fields, &batch))?;
            }
            Ok(())
        })
    }

    fn resolve_sequence_names(
        &self,
        database: &Database,
        sequence_names: &[String],
    ) -> Result<Vec<String>, QueryError> {
        if !sequence_names.is_empty() {
            return Ok(sequence_names.to_vec());
        }
        database
            .default_nucleotide_sequence()
            .map(|name| vec![name.to_string()])
            .ok_or_else(|| {
                QueryError::BadRequest(
                    "no sequenceNames given and no unique default nucleotide sequence".to_string(),
                )
            })
    }

    fn stream_sequences(
        &self,
        database: &Database,
        query: &Query,
        sequence_names: &[String],
        aligned: bool,
        deadline: &QueryDeadline,
        sink: &mut dyn RecordSink,
    ) -> Result<(), QueryError> {
        self.stream_batches(database, deadline, sink, |partition, emit| {
            let operator = compile(
                &query.filter_expression,
                database,
                partition,
                AmbiguityMode::None,
            )?;
            let mut materializer =
                SequenceMaterializer::new(database, partition, sequence_names, aligned)?;
            let bitmap = operator.evaluate().into_owned();
            let mut reader = BatchedBitmapReader::new(bitmap, self.batch_size);
            while let Some(batch) = reader.next_batch() {
                deadline.check()?;
                emit(materializer.materialize(database, partition, &batch)?)?;
            }
            Ok(())
        })
    }

    /// Run `produce` per partition on the worker pool, forwarding emitted
    /// batches through a bounded channel to `sink` on the calling thread.
    ///
    /// A failing sink cancels the query and drains the channel so blocked
    /// producers can unwind.
    fn stream_batches<F>(
        &self,
        database: &Database,
        deadline: &QueryDeadline,
        sink: &mut dyn RecordSink,
        produce: F,
    ) -> Result<(), QueryError>
    where
        F: Fn(
                &DatabasePartition,
                &mut dyn FnMut(Vec<OutputRow>) -> Result<(), QueryError>,
            ) -> Result<(), QueryError>
            + Send
            + Sync,
    {
        let (sender, receiver) = crossbeam_channel::bounded::<Vec<OutputRow>>(self.channel_capacity);
        let produce = &produce;
        std::thread::scope(|scope| {
            let producer = scope.spawn(move || {
                let result = database
                    .partitions()
                    .par_iter()
                    .try_for_each(|partition| -> Result<(), QueryError> {
                        deadline.check()?;
                        let sender = sender.clone();
                        let mut emit = move |rows: Vec<OutputRow>| -> Result<(), QueryError> {
                            sender
                                .send(rows)
                                .map_err(|_| QueryError::Cancelled)
                        };
                        produce(partition, &mut emit)
                    });
                result
            });

            let mut sink_error: Option<QueryError> = None;
            for rows in &receiver {
                if sink_error.is_some() {
                    // Drain so blocked producers can finish unwinding.
                    continue;
                }
                if let Err(error) = sink.write_batch(rows) {
                    deadline.cancel();
                    sink_error = Some(error);
                }
            }

            let produced = producer.join().expect("producer thread panicked");
            debug!("row_stream_finished");
            match sink_error {
                Some(error) => Err(error),
                None => produced,
            }
        })
    }
}

/// Apply `offset`/`limit` to a row stream.
fn apply_window(
    rows: impl IntoIterator<Item = OutputRow>,
    offset: Option<u32>,
    limit: Option<u32>,
) -> Vec<OutputRow> {
    let iter = rows.into_iter().skip(offset.unwrap_or(0) as usize);
    match limit {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    }
}

/// K-way merge of per-partition key-sorted row queues.
fn merge_sorted(mut partials: Vec<VecDeque<(Vec<Key>, OutputRow)>>) -> Vec<OutputRow> {
    let mut heap: BinaryHeap<Reverse<(Vec<Key>, usize)>> = BinaryHeap::new();
    for (index, queue) in partials.iter().enumerate() {
        if let Some((keys, _)) = queue.front() {
            heap.push(Reverse((keys.clone(), index)));
        }
    }
    let mut merged = Vec::new();
    while let Some(Reverse((_, index))) = heap.pop() {
        let (_, row) = partials[index]
            .pop_front()
            .expect("heap entry implies a queued row");
        merged.push(row);
        if let Some((keys, _)) = partials[index].front() {
            heap.push(Reverse((keys.clone(), index)));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::actions::Key;

    fn row(label: &str) -> OutputRow {
        let mut row = OutputRow::new();
        row.insert("label".to_string(), serde_json::json!(label));
        row
    }

    #[test]
    fn test_merge_sorted_interleaves() {
        let left: VecDeque<_> = vec![
            (vec![Key::Int(1)], row("a")),
            (vec![Key::Int(4)], row("c")),
        ]
        .into();
        let right: VecDeque<_> = vec![
            (vec![Key::Int(2)], row("b")),
            (vec![Key::Int(9)], row("d")),
        ]
        .into();
        let merged = merge_sorted(vec![left, right]);
        let labels: Vec<_> = merged
            .iter()
            .map(|row| row["label"].as_str().expect("label").to_string())
            .collect();
        assert_eq!(labels, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_apply_window() {
        let rows: Vec<OutputRow> = ["a", "b", "c", "d"].iter().map(|l| row(l)).collect();
        let windowed = apply_window(rows, Some(1), Some(2));
        let labels: Vec<_> = windowed
            .iter()
            .map(|row| row["label"].as_str().expect("label").to_string())
            .collect();
        assert_eq!(labels, vec!["b", "c"]);
    }
}
