use axum::extract::State;
use axum::Json;
use scriptflow_core::account::{Account, AccountProfile};

use crate::error::AppError;
use crate::identity::UserId;
use crate::state::AppState;

/// PUT /api/accounts/me: upsert the caller's profile on sign-in.
pub async fn upsert_me(
    State(app): State<AppState>,
    UserId(user): UserId,
    Json(profile): Json<AccountProfile>,
) -> Result<Json<Account>, AppError> {
    let existing = app.store.get_account(&user).await?;
    let account = Account::sign_in(existing, &user, profile)?;
    app.store.upsert_account(&account).await?;
    Ok(Json(account))
}
