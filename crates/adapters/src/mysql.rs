use std::path::PathBuf;

use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{ClientIdentity, Column, OptsBuilder, Params, Pool, Row, SslOpts, Value};
use tabledit_core::columns::ColumnInfo;
use tabledit_core::edit_session::{BackendError, LoadedPage, PageBackend, StatementBackend};
use tabledit_core::settings::{ConnectionProfile, PasswordSource, TlsMode};
use tabledit_core::sql_render::{page_select_sql, RenderedStatement, SqlDialect, TableTarget};
use tabledit_core::value::{RowSnapshot, Scalar};

pub const PASSWORD_ENV: &str = "TABLEDIT_DB_PASSWORD";

const BINARY_CHARSET: u16 = 63;

#[derive(Debug, Clone)]
pub struct MysqlEditBackend {
    pool: Pool,
}

impl MysqlEditBackend {
    #[must_use]
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        Self {
            pool: Pool::new(opts_from_profile(profile)),
        }
    }

    pub async fn fetch_columns(&self, target: &TableTarget) -> Result<Vec<ColumnInfo>, BackendError> {
        let mut conn = self.pool.get_conn().await.map_err(to_backend_error)?;
        conn.exec_map(
            "SELECT COLUMN_NAME, COLUMN_TYPE, COLUMN_KEY \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            (
                target.schema().map(str::to_string),
                target.table().to_string(),
            ),
            |(name, data_type, column_key): (String, String, String)| ColumnInfo {
                name,
                data_type,
                primary_key: column_key.eq_ignore_ascii_case("PRI"),
            },
        )
        .await
        .map_err(to_backend_error)
    }

    pub async fn disconnect(&self) -> Result<(), mysql_async::Error> {
        self.pool.clone().disconnect().await
    }
}

#[async_trait]
impl PageBackend for MysqlEditBackend {
    async fn fetch_page(
        &self,
        target: &TableTarget,
        limit: usize,
        offset: usize,
    ) -> Result<LoadedPage, BackendError> {
        let columns = self.fetch_columns(target).await?;
        if columns.is_empty() {
            return Err(BackendError::new(format!(
                "table `{}` not found or has no columns",
                target.table()
            )));
        }

        let sql = page_select_sql(target, &columns, limit, offset, SqlDialect::MySql);
        tracing::debug!(%sql, "fetching page");
        let mut conn = self.pool.get_conn().await.map_err(to_backend_error)?;
        let rows = conn
            .exec::<Row, _, _>(sql, ())
            .await
            .map_err(to_backend_error)?
            .into_iter()
            .map(row_to_snapshot)
            .collect();

        Ok(LoadedPage { columns, rows })
    }
}

#[async_trait]
impl StatementBackend for MysqlEditBackend {
    async fn execute(&self, statement: &RenderedStatement) -> Result<u64, BackendError> {
        let params = statement
            .params
            .iter()
            .map(scalar_to_mysql_value)
            .collect::<Vec<_>>();
        let mut conn = self.pool.get_conn().await.map_err(to_backend_error)?;
        conn.exec_drop(statement.sql.as_str(), Params::Positional(params))
            .await
            .map_err(to_backend_error)?;
        Ok(conn.affected_rows())
    }
}

fn opts_from_profile(profile: &ConnectionProfile) -> OptsBuilder {
    // Matched rather than changed rows, so re-saving an identical value is not a conflict.
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()))
        .client_found_rows(true);

    if let Some(password) = resolve_password(profile) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = &profile.database {
        builder = builder.db_name(Some(database.clone()));
    }

    if let Some(ssl_opts) = ssl_opts_from_profile(profile) {
        builder = builder.ssl_opts(ssl_opts);
    }

    builder
}

fn resolve_password(profile: &ConnectionProfile) -> Option<String> {
    let env_password = std::env::var(PASSWORD_ENV).ok().filter(|pw| !pw.is_empty());

    match profile.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => load_keyring_password(profile).or(env_password),
    }
}

fn ssl_opts_from_profile(profile: &ConnectionProfile) -> Option<SslOpts> {
    if !profile_requests_tls(profile) {
        return None;
    }

    let verify_identity = profile.tls_mode == TlsMode::VerifyIdentity;
    let mut ssl_opts = SslOpts::default()
        .with_danger_skip_domain_validation(!verify_identity && profile.tls_accept_invalid_certs)
        .with_danger_accept_invalid_certs(!verify_identity && profile.tls_accept_invalid_certs);

    if let Some(ca_cert_path) = non_empty(profile.tls_ca_cert_path.as_deref()) {
        ssl_opts = ssl_opts.with_root_certs(vec![PathBuf::from(ca_cert_path).into()]);
    }

    if let Some(identity) = client_identity_from_profile(profile) {
        ssl_opts = ssl_opts.with_client_identity(Some(identity));
    }

    Some(ssl_opts)
}

fn profile_requests_tls(profile: &ConnectionProfile) -> bool {
    match profile.tls_mode {
        TlsMode::Disabled => false,
        TlsMode::Prefer => {
            non_empty(profile.tls_ca_cert_path.as_deref()).is_some()
                || client_identity_from_profile(profile).is_some()
                || profile.tls_accept_invalid_certs
        }
        TlsMode::Require | TlsMode::VerifyIdentity => true,
    }
}

fn client_identity_from_profile(profile: &ConnectionProfile) -> Option<ClientIdentity> {
    let cert_path = non_empty(profile.tls_client_cert_path.as_deref())?;
    let key_path = non_empty(profile.tls_client_key_path.as_deref())?;
    Some(ClientIdentity::new(
        PathBuf::from(cert_path).into(),
        PathBuf::from(key_path).into(),
    ))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &ConnectionProfile) -> Option<String> {
    let service = non_empty(profile.keyring_service.as_deref()).unwrap_or("tabledit");
    let account = non_empty(profile.keyring_account.as_deref()).unwrap_or(profile.name.as_str());
    let entry = keyring::Entry::new(service, account).ok()?;
    match entry.get_password() {
        Ok(password) if !password.is_empty() => Some(password),
        Ok(_) => None,
        Err(error) => {
            tracing::debug!(service, account, %error, "keyring lookup failed");
            None
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &ConnectionProfile) -> Option<String> {
    None
}

fn row_to_snapshot(row: Row) -> RowSnapshot {
    let columns = row.columns();
    Row::unwrap(row)
        .into_iter()
        .zip(columns.iter())
        .map(|(value, column)| {
            (
                column.name_str().into_owned(),
                mysql_value_to_scalar(value, is_binary_column(column)),
            )
        })
        .collect()
}

fn is_binary_column(column: &Column) -> bool {
    column.character_set() == BINARY_CHARSET
        && matches!(
            column.column_type(),
            ColumnType::MYSQL_TYPE_TINY_BLOB
                | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
                | ColumnType::MYSQL_TYPE_LONG_BLOB
                | ColumnType::MYSQL_TYPE_BLOB
                | ColumnType::MYSQL_TYPE_VAR_STRING
                | ColumnType::MYSQL_TYPE_STRING
                | ColumnType::MYSQL_TYPE_VARCHAR
                | ColumnType::MYSQL_TYPE_BIT
                | ColumnType::MYSQL_TYPE_GEOMETRY
        )
}

fn mysql_value_to_scalar(value: Value, binary: bool) -> Scalar {
    match value {
        Value::NULL => Scalar::Null,
        Value::Bytes(bytes) if binary => Scalar::Binary(bytes),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Scalar::Text(text),
            Err(error) => Scalar::Binary(error.into_bytes()),
        },
        Value::Int(value) => Scalar::Integer(value),
        Value::UInt(value) => {
            i64::try_from(value).map_or_else(|_| Scalar::Text(value.to_string()), Scalar::Integer)
        }
        Value::Float(value) => Scalar::Float(f64::from(value)),
        Value::Double(value) => Scalar::Float(value),
        Value::Date(year, month, day, 0, 0, 0, 0) => {
            Scalar::Text(format!("{year:04}-{month:02}-{day:02}"))
        }
        Value::Date(year, month, day, hour, minute, second, 0) => Scalar::Text(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
        )),
        Value::Date(year, month, day, hour, minute, second, micros) => Scalar::Text(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
        )),
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = days * 24 + u32::from(hours);
            if micros == 0 {
                Scalar::Text(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
            } else {
                Scalar::Text(format!(
                    "{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
                ))
            }
        }
    }
}

fn scalar_to_mysql_value(value: &Scalar) -> Value {
    match value {
        Scalar::Null => Value::NULL,
        Scalar::Bool(flag) => Value::Int(i64::from(*flag)),
        Scalar::Integer(number) => Value::Int(*number),
        Scalar::Float(number) => Value::Double(*number),
        Scalar::Text(text) => Value::Bytes(text.as_bytes().to_vec()),
        Scalar::Binary(bytes) => Value::Bytes(bytes.clone()),
    }
}

fn to_backend_error(error: mysql_async::Error) -> BackendError {
    BackendError::new(error.to_string())
}
