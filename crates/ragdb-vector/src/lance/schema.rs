use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

use ragdb_core::types::Column;

pub fn build_arrow_schema(embedding_dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new(Column::Id.as_str(), DataType::Utf8, false),
		Field::new(Column::Text.as_str(), DataType::Utf8, false),
		Field::new(Column::SourceName.as_str(), DataType::Utf8, false),
		Field::new(Column::Embedding.as_str(), DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), embedding_dim), true),
		Field::new(Column::Metadata.as_str(), DataType::Utf8, true),
	]))
}

/// Width of the embedding column, if the schema has one.
pub fn embedding_dim(schema: &Schema) -> Option<usize> {
	let field = schema.field_with_name(Column::Embedding.as_str()).ok()?;
	match field.data_type() {
		DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
		_ => None,
	}
}
