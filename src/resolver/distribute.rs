use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::SqlFxError;
use crate::results::Row;

/// Splits one batch's rows into one outcome per (deduplicated) input, in input order.
pub type Distribute<I, R> =
    Arc<dyn Fn(&[I], Vec<Row>) -> Vec<Result<R, SqlFxError>> + Send + Sync>;

pub(crate) fn ordered<I, O, D>(decode: D) -> Distribute<I, O>
where
    I: 'static,
    O: 'static,
    D: Fn(&Row) -> Result<O, SqlFxError> + Send + Sync + 'static,
{
    Arc::new(move |inputs: &[I], rows: Vec<Row>| {
        if rows.len() != inputs.len() {
            let err = SqlFxError::ResultLengthMismatch {
                expected: inputs.len(),
                actual: rows.len(),
            };
            return inputs.iter().map(|_| Err(err.clone())).collect();
        }
        rows.iter().map(&decode).collect()
    })
}

pub(crate) fn find_by_id<I, O, K, D>(row_id: K, decode: D) -> Distribute<I, Option<O>>
where
    I: Hash + Eq + 'static,
    O: 'static,
    K: Fn(&Row) -> Option<I> + Send + Sync + 'static,
    D: Fn(&Row) -> Result<O, SqlFxError> + Send + Sync + 'static,
{
    Arc::new(move |inputs: &[I], rows: Vec<Row>| {
        let positions: HashMap<&I, usize> = inputs.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let mut outcomes: Vec<Option<Result<Option<O>, SqlFxError>>> =
            inputs.iter().map(|_| None).collect();

        for row in &rows {
            let Some(id) = row_id(row) else { continue };
            if let Some(&pos) = positions.get(&id)
                && outcomes[pos].is_none()
            {
                outcomes[pos] = Some(decode(row).map(Some));
            }
        }
        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(Ok(None)))
            .collect()
    })
}

pub(crate) fn grouped<I, O, K, D>(row_key: K, decode: D) -> Distribute<I, Vec<O>>
where
    I: Hash + Eq + 'static,
    O: 'static,
    K: Fn(&Row) -> Option<I> + Send + Sync + 'static,
    D: Fn(&Row) -> Result<O, SqlFxError> + Send + Sync + 'static,
{
    Arc::new(move |inputs: &[I], rows: Vec<Row>| {
        let positions: HashMap<&I, usize> = inputs.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let mut groups: Vec<Vec<&Row>> = inputs.iter().map(|_| Vec::new()).collect();

        for row in &rows {
            if let Some(key) = row_key(row)
                && let Some(&pos) = positions.get(&key)
            {
                groups[pos].push(row);
            }
        }
        groups
            .into_iter()
            .map(|group| group.into_iter().map(&decode).collect())
            .collect()
    })
}

pub(crate) fn void<I: 'static>() -> Distribute<I, ()> {
    Arc::new(|inputs: &[I], _rows: Vec<Row>| inputs.iter().map(|_| Ok(())).collect())
}
