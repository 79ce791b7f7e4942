//! Tests d'intégration PostgreSQL
//!
//! Ces tests nécessitent une base PostgreSQL/PostGIS disponible.
//! Configuration via variables d'environnement:
//! - PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE
//!
//! Exécution:
//! ```bash
//! # Avec PostgreSQL local
//! cargo test --test postgres_integration -- --ignored
//!
//! # Avec Docker
//! docker run -d --name postgres-test -e POSTGRES_PASSWORD=test -p 5432:5432 postgis/postgis
//! PGPASSWORD=test cargo test --test postgres_integration -- --ignored
//! ```
//!
//! La traduction gère son propre runtime tokio: les tests sont synchrones et
//! les vérifications passent par un runtime séparé.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::runtime::Runtime;
use tokio_postgres::Row;
use vector_translate::config::RunConfig;
use vector_translate::{create_pool, run, DatabaseConfig, DriverRegistry, RunStatus};

const TOWNS: &str = r#"{"type":"FeatureCollection","features":[
    {"type":"Feature","properties":{"Name":"Aulnay","pop":120,"created":"2024-01-15"},"geometry":{"type":"Point","coordinates":[2.35,48.85]}},
    {"type":"Feature","properties":{"Name":"Brest","pop":45,"created":"2023-06-01"},"geometry":{"type":"Point","coordinates":[-4.48,48.39]}},
    {"type":"Feature","properties":{"Name":"Caen","pop":900,"created":null},"geometry":{"type":"Point","coordinates":[-0.37,49.18]}}
]}"#;

/// Schéma propre à chaque test
fn connection(schema: &str) -> String {
    format!("PG:schemas={}", schema)
}

/// Fichier `towns.geojson` dans un répertoire propre au test
fn source_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "vector_translate_pg_{}_{}",
        std::process::id(),
        name
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("towns.geojson");
    std::fs::write(&path, TOWNS).unwrap();
    path
}

fn pg_config(source: &Path, schema: &str) -> RunConfig {
    RunConfig {
        format: "PostgreSQL".into(),
        source: source.display().to_string(),
        destination: connection(schema),
        ..Default::default()
    }
}

/// Exécute une requête de vérification sur un runtime dédié
fn rows(sql: &str) -> Result<Vec<Row>> {
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let pool = create_pool(&DatabaseConfig::from_env()).await?;
        let client = pool.get().await?;
        Ok(client.query(sql, &[]).await?)
    })
}

fn reset_schema(schema: &str) {
    let runtime = Runtime::new().expect("Failed to build runtime");
    runtime
        .block_on(async {
            let pool = create_pool(&DatabaseConfig::from_env()).await?;
            let client = pool.get().await?;
            client
                .batch_execute(&format!(
                    "DROP SCHEMA IF EXISTS {schema} CASCADE; CREATE EXTENSION IF NOT EXISTS postgis;"
                ))
                .await?;
            Ok::<_, anyhow::Error>(())
        })
        .expect("Failed to reset schema");
}

fn count(table: &str) -> i64 {
    let rows = rows(&format!("SELECT COUNT(*) FROM {}", table)).expect("Failed to count");
    rows[0].get(0)
}

/// Test de connexion basique
#[test]
#[ignore = "Requires PostgreSQL database"]
fn test_database_connection() {
    let rows = rows("SELECT 1 as test").expect("Query failed");
    let value: i32 = rows[0].get("test");
    assert_eq!(value, 1);
}

/// Création de la table, lavage des noms et types de colonnes
#[test]
#[ignore = "Requires PostgreSQL database"]
fn test_translate_geojson_to_postgis() {
    reset_schema("vt_create");
    let source = source_file("create");

    let report = run(&pg_config(&source, "vt_create"), &DriverRegistry::default())
        .expect("Translation failed");
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.features_written(), 3);
    assert_eq!(count("vt_create.towns"), 3);

    let columns: Vec<(String, String)> = rows(
        "SELECT column_name::text, udt_name::text FROM information_schema.columns \
         WHERE table_schema = 'vt_create' AND table_name = 'towns' ORDER BY ordinal_position",
    )
    .expect("Failed to query columns")
    .iter()
    .map(|r| (r.get(0), r.get(1)))
    .collect();

    let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["fid", "geometry", "name", "pop", "created"]);
    assert_eq!(columns[3].1, "int4");
    assert_eq!(columns[4].1, "date");

    let srid: i32 = rows("SELECT Find_SRID('vt_create', 'towns', 'geometry')")
        .expect("Failed to query srid")[0]
        .get(0);
    assert_eq!(srid, 4326);

    std::fs::remove_file(source).ok();
}

/// Ajout puis remplacement d'une table existante
#[test]
#[ignore = "Requires PostgreSQL database"]
fn test_append_and_overwrite() {
    reset_schema("vt_append");
    let source = source_file("append");
    let registry = DriverRegistry::default();

    run(&pg_config(&source, "vt_append"), &registry).expect("Translation failed");

    let append = RunConfig {
        append: true,
        where_clause: Some("pop > 100".into()),
        ..pg_config(&source, "vt_append")
    };
    let report = run(&append, &registry).expect("Append failed");
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(count("vt_append.towns"), 5);

    let overwrite = RunConfig {
        overwrite: true,
        ..pg_config(&source, "vt_append")
    };
    run(&overwrite, &registry).expect("Overwrite failed");
    assert_eq!(count("vt_append.towns"), 3);

    let existing = RunConfig {
        update: true,
        ..pg_config(&source, "vt_append")
    };
    let report = run(&existing, &registry).expect("Run failed");
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(count("vt_append.towns"), 3);

    std::fs::remove_file(source).ok();
}

/// Reprojection et options de création de couche
#[cfg(feature = "reproject")]
#[test]
#[ignore = "Requires PostgreSQL database"]
fn test_reproject_with_layer_options() {
    reset_schema("vt_l93");
    let source = source_file("l93");

    let config = RunConfig {
        target_srs: Some("EPSG:2154".into()),
        new_layer_name: Some("Communes L93".into()),
        layer_creation_options: vec!["GEOMETRY_NAME=geom".into(), "FID=gid".into()],
        group_transactions: 2,
        ..pg_config(&source, "vt_l93")
    };
    let report = run(&config, &DriverRegistry::default()).expect("Translation failed");
    assert_eq!(report.status, RunStatus::Success);
    // 3 entités par groupes de 2
    assert_eq!(report.layers[0].transactions, 2);

    let rows = rows(
        "SELECT ST_SRID(geom), ST_X(geom) FROM vt_l93.communes_l93 WHERE name = 'Aulnay'",
    )
    .expect("Failed to query geometry");
    assert_eq!(rows.len(), 1);
    let srid: i32 = rows[0].get(0);
    let x: f64 = rows[0].get(1);
    assert_eq!(srid, 2154);
    assert!((x - 652_000.0).abs() < 5_000.0);

    std::fs::remove_file(source).ok();
}
