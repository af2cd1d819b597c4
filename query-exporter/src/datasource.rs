use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
#[cfg(test)]
use mockall::automock;
use sea_orm::prelude::Decimal;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, JsonValue, QueryResult, Statement, TryGetable,
};
use secrecy::ExposeSecret;

use crate::error::DataSourceError;
use crate::settings::DatabaseSettings;
use crate::task::{ColumnValue, Response};

/// Relational source the task queries run against.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataSource: fmt::Debug + Send + Sync {
    async fn check(&self) -> Result<(), DataSourceError>;

    /// Runs `request` as-is and returns its first row, or `None` if the query produced no rows.
    async fn fetch_first_row(&self, request: &str) -> Result<Option<Response>, DataSourceError>;
}

/// Connection pool over PostgreSQL, MySQL or SQLite, chosen by the URL scheme.
pub struct SqlDataSource {
    connection: DatabaseConnection,
}

impl fmt::Debug for SqlDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlDataSource")
            .field("backend", &self.connection.get_database_backend())
            .finish()
    }
}

impl SqlDataSource {
    #[tracing::instrument(level = "info", skip(settings), fields(max_connections=%settings.max_connections))]
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DataSourceError> {
        let mut options = ConnectOptions::new(settings.url.expose_secret().clone());
        options
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .connect_timeout(settings.connect_timeout)
            .connect_lazy(settings.connect_lazy)
            .sqlx_logging(false);

        let connection = Database::connect(options).await.map_err(DataSourceError::Connection)?;
        tracing::info!(backend=?connection.get_database_backend(), "connected to data source");
        Ok(Self { connection })
    }

    pub const fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub const fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

#[async_trait]
impl DataSource for SqlDataSource {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn check(&self) -> Result<(), DataSourceError> {
        self.connection.ping().await.map_err(DataSourceError::Connection)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn fetch_first_row(&self, request: &str) -> Result<Option<Response>, DataSourceError> {
        let statement = Statement::from_string(self.connection.get_database_backend(), request.to_string());
        let row = self.connection.query_one(statement).await?;
        row.as_ref().map(decode_row).transpose()
    }
}

/// Decodes every column of `row` by position. A column no decoder accepts fails the row rather
/// than being left out of the response.
fn decode_row(row: &QueryResult) -> Result<Response, DataSourceError> {
    let columns: Vec<(String, ColumnValue)> = row
        .column_names()
        .into_iter()
        .enumerate()
        .map(|(index, column)| match decode_column(row, index) {
            Ok(value) => Ok((column, value)),
            Err(source) => Err(DataSourceError::Column { column, source }),
        })
        .collect::<Result<_, _>>()?;

    Ok(Response::from_columns(columns))
}

type ColumnDecoder = fn(&QueryResult, usize) -> Result<ColumnValue, DbErr>;

// Tried in order; the first decoder whose type is compatible with the column's value wins.
const COLUMN_DECODERS: [ColumnDecoder; 12] = [
    |row, index| decode_as::<i64>(row, index, ColumnValue::Integer),
    |row, index| decode_as::<i32>(row, index, |v| ColumnValue::Integer(v.into())),
    |row, index| decode_as::<i16>(row, index, |v| ColumnValue::Integer(v.into())),
    |row, index| decode_as::<u64>(row, index, unsigned_value),
    |row, index| decode_as::<f64>(row, index, ColumnValue::Float),
    |row, index| decode_as::<f32>(row, index, |v| ColumnValue::Float(v.into())),
    |row, index| decode_as::<Decimal>(row, index, decimal_value),
    |row, index| decode_as::<bool>(row, index, ColumnValue::Bool),
    |row, index| decode_as::<String>(row, index, ColumnValue::Text),
    |row, index| decode_as::<DateTime<Utc>>(row, index, |v| ColumnValue::Text(v.to_rfc3339())),
    |row, index| decode_as::<NaiveDateTime>(row, index, |v| ColumnValue::Text(v.to_string())),
    |row, index| decode_as::<JsonValue>(row, index, ColumnValue::from),
];

fn decode_column(row: &QueryResult, index: usize) -> Result<ColumnValue, DbErr> {
    let mut last_error = None;
    for decode in COLUMN_DECODERS {
        match decode(row, index) {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(err),
        }
    }

    Err(last_error.unwrap_or_else(|| DbErr::Type(format!("no decoder for column {index}"))))
}

fn decode_as<T: TryGetable>(
    row: &QueryResult, index: usize, into_value: fn(T) -> ColumnValue,
) -> Result<ColumnValue, DbErr> {
    row.try_get_by_index::<Option<T>>(index)
        .map(|value| value.map_or(ColumnValue::Null, into_value))
}

fn unsigned_value(value: u64) -> ColumnValue {
    i64::try_from(value).map_or(ColumnValue::Float(value as f64), ColumnValue::Integer)
}

fn decimal_value(value: Decimal) -> ColumnValue {
    let text = value.to_string();
    text.parse::<f64>().map_or(ColumnValue::Text(text), ColumnValue::Float)
}
