//! Driver PostgreSQL/PostGIS (écriture)
//!
//! Une datasource correspond à un schéma d'une base; chaque table est une
//! couche. Les entités sont insérées une par une avec des requêtes préparées,
//! la géométrie étant transmise en EWKB. Les transactions sont pilotées par le
//! writer du pipeline (`BEGIN`/`COMMIT`/`ROLLBACK`).
//!
//! Le driver est synchrone vu du pipeline: il possède son propre runtime tokio
//! mono-thread et bloque sur chaque requête.

use std::fmt::Display;
use std::future::Future;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use deadpool_postgres::{Object, Pool};
use geo::{Geometry, Polygon};
use layer_pipeline::{
    DataSource, Feature, FieldSpec, FieldType, FieldValue, GeometryKind, GeometryType, Layer,
    LayerError, SpatialRef,
};
use tokio_postgres::types::ToSql;
use tracing::{debug, info, warn};
use wkb::geom_to_wkb;

use super::option_value;
use super::pool::{create_pool, test_connection, DatabaseConfig};

const DEFAULT_GEOMETRY_COLUMN: &str = "geometry";
const DEFAULT_FID_COLUMN: &str = "fid";

pub struct PostgresDriver;

impl super::Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["PG", "PostGIS"]
    }

    fn can_open(&self, path: &str) -> bool {
        path.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("PG:"))
    }

    fn open(&self, path: &str, update: bool) -> Result<Box<dyn DataSource>> {
        if !update {
            bail!("PostgreSQL datasources can only be used as destination: {}", path);
        }
        let config = DatabaseConfig::from_connection_string(path)?;
        Ok(Box::new(PgDataSource::connect(&config)?))
    }

    fn create(&self, path: &str, options: &[String]) -> Result<Box<dyn DataSource>> {
        if !options.is_empty() {
            debug!(?options, "PostgreSQL driver ignores datasource creation options");
        }
        let config = DatabaseConfig::from_connection_string(path)?;
        Ok(Box::new(PgDataSource::connect(&config)?))
    }
}

/// Connexion partagée entre la datasource et ses couches
struct PgSession {
    runtime: tokio::runtime::Runtime,
    client: Object,
    _pool: Pool,
}

impl PgSession {
    fn connect(config: &DatabaseConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build tokio runtime")?;

        let (pool, client) = runtime.block_on(async {
            let pool = create_pool(config).await?;
            test_connection(&pool).await?;
            let client = pool
                .get()
                .await
                .context("Failed to get connection from pool")?;
            Ok::<_, anyhow::Error>((pool, client))
        })?;

        Ok(Self {
            runtime,
            client,
            _pool: pool,
        })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn batch(&self, sql: &str) -> Result<(), tokio_postgres::Error> {
        self.block_on(self.client.batch_execute(sql))
    }
}

fn backend(error: impl Display) -> LayerError {
    LayerError::Backend(error.to_string())
}

/// Identifiant SQL entre guillemets
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Nom de table ou de colonne "blanchi": minuscules, caractères spéciaux en `_`
pub fn launder(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '_'
            }
        })
        .collect()
}

/// Type PostgreSQL d'une colonne
fn column_type(field: &FieldSpec) -> String {
    match field.field_type {
        FieldType::Integer => "INTEGER".into(),
        FieldType::Integer64 => "BIGINT".into(),
        FieldType::Real if field.width > 0 => {
            format!("NUMERIC({},{})", field.width, field.precision)
        }
        FieldType::Real => "DOUBLE PRECISION".into(),
        FieldType::String if field.width > 0 => format!("VARCHAR({})", field.width),
        FieldType::String => "TEXT".into(),
        FieldType::Date => "DATE".into(),
        FieldType::Time => "TIME".into(),
        FieldType::DateTime => "TIMESTAMP".into(),
        FieldType::Binary => "BYTEA".into(),
        FieldType::IntegerList => "INTEGER[]".into(),
        FieldType::RealList => "DOUBLE PRECISION[]".into(),
        FieldType::StringList => "TEXT[]".into(),
    }
}

/// Type d'un champ depuis `udt_name`
fn field_type_of(udt_name: &str) -> FieldType {
    match udt_name {
        "int2" | "int4" | "bool" => FieldType::Integer,
        "int8" => FieldType::Integer64,
        "float4" | "float8" | "numeric" => FieldType::Real,
        "date" => FieldType::Date,
        "time" | "timetz" => FieldType::Time,
        "timestamp" | "timestamptz" => FieldType::DateTime,
        "bytea" => FieldType::Binary,
        "_int2" | "_int4" | "_int8" => FieldType::IntegerList,
        "_float4" | "_float8" | "_numeric" => FieldType::RealList,
        "_text" | "_varchar" | "_bpchar" => FieldType::StringList,
        _ => FieldType::String,
    }
}

/// Littéral de tableau PostgreSQL (`{1,2}`, `{"a","b"}`)
fn array_literal(items: impl Iterator<Item = String>, quoted: bool) -> String {
    let items: Vec<String> = items
        .map(|item| {
            if quoted {
                format!("\"{}\"", item.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                item
            }
        })
        .collect();
    format!("{{{}}}", items.join(","))
}

/// Valeur texte transmise au serveur (NULL pour `None`)
fn text_param(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Null => None,
        FieldValue::Binary(bytes) => Some(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
        FieldValue::IntegerList(values) => {
            Some(array_literal(values.iter().map(|v| v.to_string()), false))
        }
        FieldValue::RealList(values) => {
            Some(array_literal(values.iter().map(|v| v.to_string()), false))
        }
        FieldValue::StringList(values) => Some(array_literal(values.iter().cloned(), true)),
        other => other.to_text(),
    }
}

/// Expression SQL d'un paramètre texte vers le type du champ
fn cast_expression(placeholder: usize, field_type: FieldType) -> String {
    let target = match field_type {
        FieldType::Binary => return format!("decode(${}::text, 'hex')", placeholder),
        FieldType::Integer => "integer",
        FieldType::Integer64 => "bigint",
        FieldType::Real => "double precision",
        FieldType::String => "text",
        FieldType::Date => "date",
        FieldType::Time => "time",
        FieldType::DateTime => "timestamp",
        FieldType::IntegerList => "bigint[]",
        FieldType::RealList => "double precision[]",
        FieldType::StringList => "text[]",
    };
    format!("${}::text::{}", placeholder, target)
}

/// Convertit une géométrie en EWKB (WKB + SRID)
fn geometry_to_wkb(geom: &Geometry, srid: u32) -> Result<Vec<u8>> {
    let wkb = geom_to_wkb(geom).map_err(|e| anyhow!("Failed to convert geometry to WKB: {:?}", e))?;

    let mut ewkb = Vec::with_capacity(wkb.len() + 4);

    if wkb.len() >= 5 {
        ewkb.push(wkb[0]); // Byte order

        // Type avec flag SRID (0x20000000)
        let type_bytes = [wkb[1], wkb[2], wkb[3], wkb[4]];
        if wkb[0] == 1 {
            let geom_type = u32::from_le_bytes(type_bytes) | 0x20000000;
            ewkb.extend_from_slice(&geom_type.to_le_bytes());
            ewkb.extend_from_slice(&srid.to_le_bytes());
        } else {
            let geom_type = u32::from_be_bytes(type_bytes) | 0x20000000;
            ewkb.extend_from_slice(&geom_type.to_be_bytes());
            ewkb.extend_from_slice(&srid.to_be_bytes());
        }

        ewkb.extend_from_slice(&wkb[5..]);
    }

    Ok(ewkb)
}

/// Datasource PostGIS: les tables d'un schéma
pub struct PgDataSource {
    name: String,
    schema: String,
    session: Rc<PgSession>,
    layers: Vec<PgLayer>,
}

impl PgDataSource {
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let session = Rc::new(PgSession::connect(config)?);
        ensure_postgis(&session)?;

        let mut datasource = Self {
            name: config.display_name(),
            schema: config.schema.clone(),
            session,
            layers: Vec::new(),
        };
        datasource.load_tables()?;

        info!(
            datasource = %datasource.name,
            tables = datasource.layers.len(),
            "Connected to PostgreSQL"
        );
        Ok(datasource)
    }

    /// Charge les tables existantes du schéma
    fn load_tables(&mut self) -> Result<()> {
        let session = Rc::clone(&self.session);
        let rows = session
            .block_on(session.client.query(
                r#"
                SELECT t.table_name::text, g.f_geometry_column::text, g.coord_dimension, g.srid, g.type::text
                FROM information_schema.tables t
                LEFT JOIN geometry_columns g
                    ON g.f_table_schema = t.table_schema AND g.f_table_name = t.table_name
                WHERE t.table_schema = $1 AND t.table_type = 'BASE TABLE'
                ORDER BY t.table_name
                "#,
                &[&self.schema],
            ))
            .context("Failed to list tables")?;

        for row in rows {
            let table: String = row.get(0);
            // Une seule colonne géométrique par table
            if self.layers.iter().any(|l| l.table == table) {
                continue;
            }
            let geometry_column: Option<String> = row.get(1);
            let dimension: Option<i32> = row.get(2);
            let srid: Option<i32> = row.get(3);
            let type_name: Option<String> = row.get(4);

            let kind = match &type_name {
                Some(name) => {
                    // POINTZ, LINESTRINGM... : la dimension vient de coord_dimension
                    let base = name.trim_end_matches(['Z', 'M']);
                    let mut kind = base.parse::<GeometryKind>().unwrap_or(GeometryKind::UNKNOWN);
                    kind.has_z = dimension.unwrap_or(2) > 2;
                    kind
                }
                None => GeometryKind::new(GeometryType::None),
            };
            let srid = srid.filter(|s| *s > 0).map(|s| s as u32);

            let mut layer = PgLayer {
                session: Rc::clone(&self.session),
                schema: self.schema.clone(),
                table: table.clone(),
                fid_column: None,
                geometry_column,
                kind,
                srs: srid.map(SpatialRef::from_epsg),
                srid: srid.unwrap_or(0),
                fields: Vec::new(),
                launder: true,
            };
            layer.load_columns()?;
            debug!(table = %table, kind = %kind, fields = layer.fields.len(), "Table loaded");
            self.layers.push(layer);
        }
        Ok(())
    }

    fn create_schema(&self, schema: &str) -> Result<(), LayerError> {
        self.session
            .batch(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))
            .map_err(backend)
    }
}

/// Active PostGIS (peut nécessiter des droits superuser).
/// Si l'extension existe déjà, on dégrade gracieusement.
fn ensure_postgis(session: &PgSession) -> Result<()> {
    if let Err(e) = session.batch("CREATE EXTENSION IF NOT EXISTS postgis") {
        warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
        let exists = session
            .block_on(
                session
                    .client
                    .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[]),
            )
            .context("Failed to check pg_extension")?
            .is_some();
        if !exists {
            return Err(anyhow!(
                "PostGIS extension is not installed and could not be created: {e}"
            ));
        }
    }
    Ok(())
}

impl DataSource for PgDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer(&mut self, index: usize) -> Option<&mut dyn Layer> {
        self.layers.get_mut(index).map(|l| l as &mut dyn Layer)
    }

    /// Nom exact, ou nom blanchi
    fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.table == name)
            .or_else(|| {
                let laundered = launder(name);
                self.layers.iter().position(|l| l.table == laundered)
            })
    }

    fn execute_sql(
        &mut self,
        _statement: &str,
        _spatial_filter: Option<&Polygon<f64>>,
    ) -> Result<Box<dyn Layer>, LayerError> {
        Err(LayerError::unsupported(&self.name, "execute SQL"))
    }

    fn can_create_layer(&self) -> bool {
        true
    }

    /// Options: `GEOMETRY_NAME`, `FID`, `SCHEMA`, `LAUNDER`, `SPATIAL_INDEX`
    fn create_layer(
        &mut self,
        name: &str,
        srs: Option<&SpatialRef>,
        kind: GeometryKind,
        options: &[String],
    ) -> Result<usize, LayerError> {
        let enabled = |key: &str| {
            option_value(options, key)
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "no" | "off" | "false" | "0"))
                .unwrap_or(true)
        };
        let launder_names = enabled("LAUNDER");
        let clean = |s: &str| if launder_names { launder(s) } else { s.to_string() };

        let schema = option_value(options, "SCHEMA")
            .map(str::to_string)
            .unwrap_or_else(|| self.schema.clone());
        let table = clean(name);
        let fid_column = clean(option_value(options, "FID").unwrap_or(DEFAULT_FID_COLUMN));
        let geometry_column = (kind.flat != GeometryType::None)
            .then(|| clean(option_value(options, "GEOMETRY_NAME").unwrap_or(DEFAULT_GEOMETRY_COLUMN)));

        if self.layer_index(&table).is_some() {
            return Err(LayerError::Backend(format!("layer {table} already exists")));
        }

        let srid = match srs {
            Some(srs) => srs.epsg().unwrap_or_else(|| {
                warn!(layer = %table, srs = %srs, "No EPSG code for spatial reference, using SRID 0");
                0
            }),
            None => 0,
        };

        if schema != "public" {
            self.create_schema(&schema)?;
        }

        let qualified = format!("{}.{}", quote_ident(&schema), quote_ident(&table));
        let mut columns = vec![format!("{} BIGSERIAL PRIMARY KEY", quote_ident(&fid_column))];
        if let Some(geometry_column) = &geometry_column {
            let mut type_name = GeometryKind::new(kind.flat).to_string();
            if kind.has_z {
                type_name.push('Z');
            }
            columns.push(format!(
                "{} geometry({}, {})",
                quote_ident(geometry_column),
                type_name,
                srid
            ));
        }
        let sql = format!("CREATE TABLE {} ({})", qualified, columns.join(", "));
        self.session.batch(&sql).map_err(backend)?;

        if let Some(geometry_column) = geometry_column.as_ref().filter(|_| enabled("SPATIAL_INDEX")) {
            let index = format!("{}_{}_geom_idx", table, geometry_column);
            self.session
                .batch(&format!(
                    "CREATE INDEX {} ON {} USING GIST ({})",
                    quote_ident(&index),
                    qualified,
                    quote_ident(geometry_column)
                ))
                .map_err(backend)?;
        }

        info!("Created table {}.{}", schema, table);

        self.layers.push(PgLayer {
            session: Rc::clone(&self.session),
            schema,
            table,
            fid_column: Some(fid_column),
            geometry_column,
            kind,
            srs: srs.cloned(),
            srid,
            fields: Vec::new(),
            launder: launder_names,
        });
        Ok(self.layers.len() - 1)
    }

    fn delete_layer(&mut self, index: usize) -> Result<(), LayerError> {
        let layer = self
            .layers
            .get(index)
            .ok_or_else(|| LayerError::NotFound(format!("layer #{index}")))?;
        self.session
            .batch(&format!("DROP TABLE IF EXISTS {} CASCADE", layer.qualified_name()))
            .map_err(backend)?;
        info!("Dropped table {}.{}", layer.schema, layer.table);
        self.layers.remove(index);
        Ok(())
    }
}

/// Table PostGIS
pub struct PgLayer {
    session: Rc<PgSession>,
    schema: String,
    table: String,
    fid_column: Option<String>,
    geometry_column: Option<String>,
    kind: GeometryKind,
    srs: Option<SpatialRef>,
    srid: u32,
    fields: Vec<FieldSpec>,
    launder: bool,
}

impl PgLayer {
    fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Colonnes attributaires et clé primaire d'une table existante
    fn load_columns(&mut self) -> Result<()> {
        let session = Rc::clone(&self.session);

        let key = session
            .block_on(session.client.query_opt(
                r#"
                SELECT a.attname::text
                FROM pg_index i
                JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                WHERE i.indrelid = $1::text::regclass AND i.indisprimary AND i.indnatts = 1
                "#,
                &[&self.qualified_name()],
            ))
            .with_context(|| format!("Failed to read primary key of {}", self.table))?;
        self.fid_column = key.map(|row| row.get(0));

        let rows = session
            .block_on(session.client.query(
                r#"
                SELECT column_name::text, udt_name::text, character_maximum_length::int4
                FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2
                ORDER BY ordinal_position
                "#,
                &[&self.schema, &self.table],
            ))
            .with_context(|| format!("Failed to read columns of {}", self.table))?;

        for row in rows {
            let name: String = row.get(0);
            let udt_name: String = row.get(1);
            let width: Option<i32> = row.get(2);

            if Some(&name) == self.fid_column.as_ref()
                || Some(&name) == self.geometry_column.as_ref()
                || udt_name == "geometry"
                || udt_name == "geography"
            {
                continue;
            }
            let spec = FieldSpec::new(name, field_type_of(&udt_name))
                .with_width(width.unwrap_or(0).max(0) as u32, 0);
            self.fields.push(spec);
        }
        Ok(())
    }

    fn rejected(&self, error: impl Display) -> LayerError {
        LayerError::rejected(&self.table, error.to_string())
    }
}

impl Layer for PgLayer {
    fn name(&self) -> &str {
        &self.table
    }

    fn schema(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Nom exact, ou nom blanchi
    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name).or_else(|| {
            self.launder
                .then(|| launder(name))
                .and_then(|laundered| self.fields.iter().position(|f| f.name == laundered))
        })
    }

    fn geometry_kind(&self) -> GeometryKind {
        self.kind
    }

    fn spatial_ref(&self) -> Option<&SpatialRef> {
        self.srs.as_ref()
    }

    fn set_attribute_filter(&mut self, _expression: Option<&str>) -> Result<(), LayerError> {
        Err(LayerError::unsupported(&self.table, "attribute filter"))
    }

    fn set_spatial_filter(&mut self, _filter: Option<&Polygon<f64>>) {
        debug!(table = %self.table, "Spatial filter ignored on PostgreSQL layer");
    }

    fn fast_feature_count(&self) -> Option<u64> {
        None
    }

    fn reset_reading(&mut self) {}

    fn next_feature(&mut self) -> Result<Option<Feature>, LayerError> {
        Err(LayerError::unsupported(&self.table, "read features"))
    }

    fn feature(&mut self, _fid: i64) -> Result<Option<Feature>, LayerError> {
        Err(LayerError::unsupported(&self.table, "read feature"))
    }

    fn create_field(&mut self, field: &FieldSpec) -> Result<(), LayerError> {
        let name = if self.launder {
            launder(&field.name)
        } else {
            field.name.clone()
        };
        let mut spec = field.clone();
        spec.name = name;

        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.qualified_name(),
            quote_ident(&spec.name),
            column_type(&spec)
        );
        self.session.batch(&sql).map_err(backend)?;
        debug!(table = %self.table, field = %spec.name, "Column added");
        self.fields.push(spec);
        Ok(())
    }

    fn create_feature(&mut self, feature: Feature) -> Result<i64, LayerError> {
        let mut columns: Vec<String> = Vec::new();
        let mut expressions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql + Sync>> = Vec::new();

        if let (Some(fid), Some(fid_column)) = (feature.fid, &self.fid_column) {
            params.push(Box::new(fid));
            columns.push(quote_ident(fid_column));
            expressions.push(format!("${}::bigint", params.len()));
        }

        if let (Some(geometry), Some(geometry_column)) = (&feature.geometry, &self.geometry_column)
        {
            let shape = super::simple_shape(&geometry.shape);
            let ewkb = geometry_to_wkb(&shape, self.srid).map_err(|e| self.rejected(e))?;
            params.push(Box::new(ewkb));
            let mut expression = format!("ST_GeomFromEWKB(${}::bytea)", params.len());

            let accepts_z = self.kind.has_z || self.kind.flat == GeometryType::Unknown;
            match geometry.z {
                Some(z) if accepts_z => {
                    params.push(Box::new(z));
                    expression = format!("ST_Force3DZ({}, ${}::float8)", expression, params.len());
                }
                _ if self.kind.has_z => expression = format!("ST_Force3DZ({})", expression),
                _ => {}
            }
            columns.push(quote_ident(geometry_column));
            expressions.push(expression);
        }

        for (spec, value) in self.fields.iter().zip(&feature.fields) {
            if value.is_null() {
                continue;
            }
            params.push(Box::new(text_param(value)));
            columns.push(quote_ident(&spec.name));
            expressions.push(cast_expression(params.len(), spec.field_type));
        }

        let returning = self
            .fid_column
            .as_ref()
            .map(|c| format!(" RETURNING {}", quote_ident(c)))
            .unwrap_or_default();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES{}", self.qualified_name(), returning)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}){}",
                self.qualified_name(),
                columns.join(", "),
                expressions.join(", "),
                returning
            )
        };

        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
        let session = &self.session;
        let row = session
            .block_on(async {
                let statement = session.client.prepare_cached(&sql).await?;
                session.client.query_opt(&statement, &refs).await
            })
            .map_err(|e| self.rejected(e))?;

        let fid = match (row, &self.fid_column) {
            (Some(row), Some(_)) => row.try_get::<_, i64>(0).map_err(|e| self.rejected(e))?,
            _ => feature.fid.unwrap_or(-1),
        };
        Ok(fid)
    }

    fn start_transaction(&mut self) -> Result<(), LayerError> {
        self.session
            .batch("BEGIN")
            .map_err(|e| LayerError::transaction(&self.table, e.to_string()))
    }

    fn commit_transaction(&mut self) -> Result<(), LayerError> {
        self.session
            .batch("COMMIT")
            .map_err(|e| LayerError::transaction(&self.table, e.to_string()))
    }

    fn rollback_transaction(&mut self) -> Result<(), LayerError> {
        self.session
            .batch("ROLLBACK")
            .map_err(|e| LayerError::transaction(&self.table, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::Driver;
    use geo::{point, polygon};

    #[test]
    fn test_launder() {
        assert_eq!(launder("Communes-2024"), "communes_2024");
        assert_eq!(launder("nom commune"), "nom_commune");
        assert_eq!(launder("déjà_vu"), "déjà_vu");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("parcelles"), "\"parcelles\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_column_types() {
        assert_eq!(column_type(&FieldSpec::new("a", FieldType::Integer64)), "BIGINT");
        assert_eq!(
            column_type(&FieldSpec::new("a", FieldType::String).with_width(80, 0)),
            "VARCHAR(80)"
        );
        assert_eq!(column_type(&FieldSpec::new("a", FieldType::StringList)), "TEXT[]");
        assert_eq!(field_type_of("int8"), FieldType::Integer64);
        assert_eq!(field_type_of("_float8"), FieldType::RealList);
        assert_eq!(field_type_of("varchar"), FieldType::String);
    }

    #[test]
    fn test_text_params() {
        assert_eq!(text_param(&FieldValue::Null), None);
        assert_eq!(
            text_param(&FieldValue::Binary(vec![0xde, 0xad])).as_deref(),
            Some("dead")
        );
        assert_eq!(
            text_param(&FieldValue::IntegerList(vec![1, 2])).as_deref(),
            Some("{1,2}")
        );
        assert_eq!(
            text_param(&FieldValue::StringList(vec!["a\"b".into(), "c".into()])).as_deref(),
            Some(r#"{"a\"b","c"}"#)
        );
        assert_eq!(cast_expression(3, FieldType::Date), "$3::text::date");
        assert_eq!(cast_expression(1, FieldType::Binary), "decode($1::text, 'hex')");
    }

    #[test]
    fn test_geometry_to_ewkb_point() {
        let point = Geometry::Point(point!(x: 1.0, y: 2.0));
        let ewkb = geometry_to_wkb(&point, 2154).unwrap();

        let wkb = geom_to_wkb(&point).unwrap();
        assert_eq!(ewkb.len(), wkb.len() + 4);
        assert_eq!(ewkb[0], wkb[0]);
        if ewkb[0] == 1 {
            let geom_type = u32::from_le_bytes([ewkb[1], ewkb[2], ewkb[3], ewkb[4]]);
            assert_eq!(geom_type, 1 | 0x20000000);
            assert_eq!(u32::from_le_bytes([ewkb[5], ewkb[6], ewkb[7], ewkb[8]]), 2154);
        }
        assert_eq!(&ewkb[9..], &wkb[5..]);
    }

    #[test]
    fn test_geometry_to_ewkb_polygon() {
        let polygon = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ]);
        let ewkb = geometry_to_wkb(&polygon, 4326).unwrap();
        assert!(ewkb.len() > 9);
    }

    #[test]
    fn test_can_open() {
        assert!(PostgresDriver.can_open("PG:dbname=gis"));
        assert!(PostgresDriver.can_open("pg:dbname=gis"));
        assert!(!PostgresDriver.can_open("out.geojson"));
    }
}
