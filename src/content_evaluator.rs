use crate::account_evaluator::check_authority_accounts;
use crate::database::Database;
use crate::ensure;
use crate::error::Result;
use crate::evaluator::{evaluate_error, unknown_object, Evaluator};
use crate::objects::ContentObject;
use crate::operations::{ContentCreateOperation, ContentUpdateOperation};
use crate::transaction::OperationResult;

#[derive(Default)]
pub struct ContentCreateEvaluator;

impl Evaluator for ContentCreateEvaluator {
    type Operation = ContentCreateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &ContentCreateOperation) -> Result<()> {
        ensure!(
            db.find_content(&op.url).is_none(),
            evaluate_error::<ContentCreateOperation>(format!("content {} already exists", op.url))
        );
        ensure!(
            db.find_account(&op.uploader).is_some(),
            unknown_object::<ContentCreateOperation>("account", &op.uploader)
        );
        check_authority_accounts::<ContentCreateOperation>(db, [&op.manage_master, &op.manage_comp])
    }

    fn do_apply(
        &mut self,
        db: &mut Database,
        op: &ContentCreateOperation,
    ) -> Result<OperationResult> {
        let created = db.head_block_time()?;
        let content = db.create::<ContentObject>(|c| {
            c.url = op.url.clone();
            c.uploader = op.uploader.clone();
            c.title = op.title.clone();
            c.manage_master = op.manage_master.clone();
            c.manage_comp = op.manage_comp.clone();
            c.created = created;
        })?;
        Ok(OperationResult::ObjectId(content.id.raw()))
    }
}

/// Either side may retitle or rotate the comp authority; only the master
/// side may rotate the master authority (enforced in validation).
#[derive(Default)]
pub struct ContentUpdateEvaluator;

impl Evaluator for ContentUpdateEvaluator {
    type Operation = ContentUpdateOperation;

    fn do_evaluate(&mut self, db: &Database, op: &ContentUpdateOperation) -> Result<()> {
        ensure!(
            db.find_content(&op.url).is_some(),
            unknown_object::<ContentUpdateOperation>("content", &op.url)
        );
        check_authority_accounts::<ContentUpdateOperation>(
            db,
            [&op.new_manage_master, &op.new_manage_comp]
                .into_iter()
                .flatten(),
        )
    }

    fn do_apply(
        &mut self,
        db: &mut Database,
        op: &ContentUpdateOperation,
    ) -> Result<OperationResult> {
        let id = db
            .find_content(&op.url)
            .map(|c| c.id)
            .ok_or_else(|| unknown_object::<ContentUpdateOperation>("content", &op.url))?;
        db.modify(id, |c| {
            if let Some(title) = &op.new_title {
                c.title = title.clone();
            }
            if let Some(master) = &op.new_manage_master {
                c.manage_master = master.clone();
            }
            if let Some(comp) = &op.new_manage_comp {
                c.manage_comp = comp.clone();
            }
        })?;
        Ok(OperationResult::Void)
    }
}
