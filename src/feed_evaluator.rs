use crate::database::Database;
use crate::ensure;
use crate::error::Result;
use crate::evaluator::{evaluate_error, Evaluator};
use crate::objects::{PriceFeed, CORE_ASSET, DOLLAR_ASSET};
use crate::operations::FeedPublishOperation;
use crate::transaction::OperationResult;

/// Records a producer's dollar price. Only active producers may publish, and
/// a later feed from the same producer replaces the earlier one.
#[derive(Default)]
pub struct FeedPublishEvaluator;

impl Evaluator for FeedPublishEvaluator {
    type Operation = FeedPublishOperation;

    fn do_evaluate(&mut self, db: &Database, op: &FeedPublishOperation) -> Result<()> {
        let producers = &db.get_global_properties()?.active_producers;
        ensure!(
            producers.iter().any(|p| p.account == op.publisher),
            evaluate_error::<FeedPublishOperation>(format!(
                "{} is not an active producer",
                op.publisher
            ))
        );
        ensure!(
            op.price.base.asset_id == DOLLAR_ASSET && op.price.quote.asset_id == CORE_ASSET,
            evaluate_error::<FeedPublishOperation>("feeds must price the dollar asset in core")
        );
        Ok(())
    }

    fn do_apply(&mut self, db: &mut Database, op: &FeedPublishOperation) -> Result<OperationResult> {
        let published = db.head_block_time()?;
        let id = db.get_feed_history()?.id;
        db.modify(id, |history| {
            history.feeds.insert(
                op.publisher.clone(),
                PriceFeed {
                    price: op.price,
                    published,
                },
            );
        })?;
        Ok(OperationResult::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{GenesisState, INIT_PRODUCER, TREASURY_ACCOUNT};
    use crate::types::{Asset, Price};

    fn publish(publisher: &str, core: i64) -> FeedPublishOperation {
        FeedPublishOperation {
            publisher: publisher.into(),
            price: Price::new(Asset::new(1, DOLLAR_ASSET), Asset::new(core, CORE_ASSET)),
        }
    }

    #[test]
    fn test_producer_feed_replaces_previous() {
        let mut db = Database::open_temporary(GenesisState::default()).unwrap();
        for core in [7, 9] {
            let op = publish(INIT_PRODUCER, core);
            FeedPublishEvaluator.do_evaluate(&db, &op).unwrap();
            FeedPublishEvaluator.do_apply(&mut db, &op).unwrap();
        }
        let history = db.get_feed_history().unwrap();
        assert_eq!(history.feeds.len(), 1);
        assert_eq!(history.feeds[INIT_PRODUCER].price.quote.amount, 9);
        assert_eq!(history.median_feed().map(|p| p.quote.amount), Some(9));
    }

    #[test]
    fn test_only_producers_publish_dollar_feeds() {
        let db = Database::open_temporary(GenesisState::default()).unwrap();
        let err = FeedPublishEvaluator
            .do_evaluate(&db, &publish(TREASURY_ACCOUNT, 5))
            .unwrap_err();
        assert_eq!(err.code(), 3_050_300);

        let inverted = FeedPublishOperation {
            publisher: INIT_PRODUCER.into(),
            price: Price::new(Asset::new(5, CORE_ASSET), Asset::new(1, DOLLAR_ASSET)),
        };
        assert!(FeedPublishEvaluator.do_evaluate(&db, &inverted).is_err());
    }
}
