//! Postgres encoding for the storage-agnostic ULIDs used throughout
//! `ingest-model`. `ingest-model` itself carries no `sqlx` dependency (it's
//! meant to be usable against any store), so the wire mapping lives here:
//! a local newtype plus `From`/`Into` conversions at the boundary, the same
//! shape `agent-sql::Id` uses for `models::Id`.

use sqlx::postgres::{self, PgArgumentBuffer, PgValueRef};
use sqlx::{Decode, Encode, Type, TypeInfo};

use ingest_model::{EventId, OrganizationId, PlaceId, ReviewEntryId, SourceId, Ulid};

/// A ULID stored as a 16-byte `bytea` column.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SqlUlid(pub Ulid);

impl std::fmt::Debug for SqlUlid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

macro_rules! convert {
    ($typed:ty) => {
        impl From<$typed> for SqlUlid {
            fn from(id: $typed) -> Self {
                SqlUlid(id.0)
            }
        }
        impl From<SqlUlid> for $typed {
            fn from(id: SqlUlid) -> Self {
                <$typed>::from(id.0)
            }
        }
    };
}

convert!(EventId);
convert!(PlaceId);
convert!(OrganizationId);
convert!(SourceId);
convert!(ReviewEntryId);

impl Type<postgres::Postgres> for SqlUlid {
    fn type_info() -> postgres::PgTypeInfo {
        postgres::PgTypeInfo::with_name("BYTEA")
    }
    fn compatible(ty: &postgres::PgTypeInfo) -> bool {
        ty.name() == "BYTEA"
    }
}

impl Encode<'_, postgres::Postgres> for SqlUlid {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> sqlx::encode::IsNull {
        buf.extend_from_slice(&self.0.to_bytes());
        sqlx::encode::IsNull::No
    }
}

impl Decode<'_, postgres::Postgres> for SqlUlid {
    fn decode(value: PgValueRef<'_>) -> Result<Self, sqlx::error::BoxDynError> {
        let bytes = <&[u8] as Decode<'_, postgres::Postgres>>::decode(value)?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| "ulid column did not contain exactly 16 bytes")?;
        Ok(SqlUlid(Ulid::from_bytes(arr)))
    }
}

impl sqlx::postgres::PgHasArrayType for SqlUlid {
    fn array_type_info() -> postgres::PgTypeInfo {
        postgres::PgTypeInfo::with_name("_BYTEA")
    }
}
