use chrono::Utc;
use sea_orm::{prelude::*, sea_query::Query};

use crate::{
    Account, AccountRole, EngineError, Money, NewAccountCmd, ResultEngine, accounts,
    util::{map_unique_violation, money_value, validate_account_id},
};

use super::{Engine, with_tx};

impl Engine {
    /// Create an account holding `initial_balance`.
    ///
    /// Fails with `InvalidAccountId` for ids `<= 0`, `InvalidDecimal` for an
    /// unparsable balance, `InvalidAmount` for a negative one and
    /// `ExistingAccount` when the id is taken.
    pub async fn create_account(&self, cmd: NewAccountCmd) -> ResultEngine<Account> {
        let NewAccountCmd {
            account_id,
            initial_balance,
        } = cmd;
        validate_account_id(account_id)?;
        let balance: Money = initial_balance.parse()?;
        if balance.is_negative() {
            return Err(EngineError::InvalidAmount(
                "initial balance must be >= 0".to_string(),
            ));
        }

        let account = Account::new(account_id, balance, Utc::now());
        let account = with_tx!(self, |db_tx| {
            let exists = accounts::Entity::find_by_id(account_id)
                .one(&db_tx)
                .await?
                .is_some();
            if exists {
                return Err(EngineError::ExistingAccount(account_id));
            }

            // A concurrent create can still slip in between the check and
            // the insert; the primary key turns that into a conflict too.
            let backend = db_tx.get_database_backend();
            let insert = Query::insert()
                .into_table(accounts::Entity)
                .columns([
                    accounts::Column::Id,
                    accounts::Column::Balance,
                    accounts::Column::CreatedAt,
                    accounts::Column::UpdatedAt,
                ])
                .values([
                    account.id.into(),
                    money_value(backend, account.balance),
                    account.created_at.into(),
                    account.updated_at.into(),
                ])
                .map_err(|err| DbErr::Custom(err.to_string()))?
                .to_owned();
            db_tx
                .execute(backend.build(&insert))
                .await
                .map_err(|err| {
                    map_unique_violation(err, || EngineError::ExistingAccount(account_id))
                })?;
            Ok(account)
        })?;

        tracing::info!(account_id, balance = %account.balance, "account created");
        Ok(account)
    }

    /// Return a point-in-time snapshot of an account.
    pub async fn account(&self, account_id: i64) -> ResultEngine<Account> {
        validate_account_id(account_id)?;
        let model = accounts::Entity::find_by_id(account_id)
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::not_found(AccountRole::Account, account_id))?;
        Account::try_from(model)
    }
}
