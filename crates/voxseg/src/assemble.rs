use crate::{
    error::{Error, Result},
    fetch::BlockLabels,
    store::SegmentId,
};

/// Scatters per-block labels back into query order.
///
/// Position `i` of the output holds the label whose pair carried index `i`.
///
/// # Errors
///
/// Returns [`Error::Assembly`] if an index is out of range, written twice,
/// or never written.
pub fn assemble<I>(n: usize, parts: I) -> Result<Vec<SegmentId>>
where
    I: IntoIterator<Item = BlockLabels>,
{
    let mut slots: Vec<Option<SegmentId>> = vec![None; n];

    for (index, id) in parts.into_iter().flatten() {
        let slot = slots.get_mut(index).ok_or_else(|| Error::Assembly {
            reason: format!("index {index} out of range for {n} locations"),
        })?;
        if slot.replace(id).is_some() {
            return Err(Error::Assembly {
                reason: format!("index {index} written more than once"),
            });
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| Error::Assembly {
                reason: format!("index {index} was never written"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_query_order_across_blocks() {
        let parts = vec![vec![(3, 30), (0, 0)], vec![(2, 20)], vec![(1, 10), (4, 40)]];
        assert_eq!(assemble(5, parts).unwrap(), vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn empty_assembles_to_empty() {
        assert!(assemble(0, Vec::<BlockLabels>::new()).unwrap().is_empty());
    }

    #[test]
    fn rejects_duplicates_gaps_and_out_of_range() {
        assert!(matches!(
            assemble(2, vec![vec![(0, 1)], vec![(0, 1), (1, 2)]]),
            Err(Error::Assembly { .. })
        ));
        assert!(matches!(
            assemble(3, vec![vec![(0, 1), (2, 3)]]),
            Err(Error::Assembly { .. })
        ));
        assert!(matches!(
            assemble(1, vec![vec![(1, 1)]]),
            Err(Error::Assembly { .. })
        ));
    }
}
