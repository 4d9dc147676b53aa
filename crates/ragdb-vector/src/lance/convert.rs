use arrow_array::cast::AsArray;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, StringArray};
use arrow_schema::ArrowError;
use std::sync::Arc;

use ragdb_core::types::{Column, StoredRow};

use super::schema::build_arrow_schema;

pub const DISTANCE_COLUMN: &str = "_distance";

pub fn rows_to_record_batch(rows: &[StoredRow], embedding_dim: i32) -> Result<RecordBatch, ArrowError> {
	let schema = build_arrow_schema(embedding_dim);
	let mut ids = Vec::with_capacity(rows.len());
	let mut texts = Vec::with_capacity(rows.len());
	let mut sources = Vec::with_capacity(rows.len());
	let mut metadata: Vec<Option<&str>> = Vec::with_capacity(rows.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(rows.len());
	for row in rows {
		ids.push(row.id.as_str());
		texts.push(row.text.as_str());
		sources.push(row.source_name.as_str());
		metadata.push(if row.metadata.is_empty() { None } else { Some(row.metadata.as_str()) });
		vectors.push(Some(row.embedding.iter().map(|&x| Some(x)).collect()));
	}
	RecordBatch::try_new(schema, vec![
		Arc::new(StringArray::from(ids)),
		Arc::new(StringArray::from(texts)),
		Arc::new(StringArray::from(sources)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors, embedding_dim)),
		Arc::new(StringArray::from(metadata)),
	])
}

/// Convert a result batch into rows. Columns absent from the batch come back empty.
pub fn record_batch_to_rows(batch: &RecordBatch) -> Vec<StoredRow> {
	let strings = |c: Column| batch.column_by_name(c.as_str()).and_then(|a| a.as_any().downcast_ref::<StringArray>());
	let ids = strings(Column::Id);
	let texts = strings(Column::Text);
	let sources = strings(Column::SourceName);
	let metadata = strings(Column::Metadata);
	let vectors = batch
		.column_by_name(Column::Embedding.as_str())
		.and_then(|a| a.as_any().downcast_ref::<FixedSizeListArray>());
	let distances = batch
		.column_by_name(DISTANCE_COLUMN)
		.and_then(|a| a.as_any().downcast_ref::<Float32Array>());

	let value = |arr: Option<&StringArray>, i: usize| {
		arr.filter(|a| a.is_valid(i)).map(|a| a.value(i).to_string()).unwrap_or_default()
	};
	(0..batch.num_rows())
		.map(|i| StoredRow {
			id: value(ids, i),
			text: value(texts, i),
			source_name: value(sources, i),
			metadata: value(metadata, i),
			embedding: vectors
				.filter(|v| v.is_valid(i))
				.map(|v| v.value(i).as_primitive::<arrow_array::types::Float32Type>().values().to_vec())
				.unwrap_or_default(),
			distance: distances.filter(|d| d.is_valid(i)).map(|d| d.value(i)),
		})
		.collect()
}
