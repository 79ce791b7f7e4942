//! Réconciliation des schémas source et destination
//!
//! Produit la table de correspondance des champs (`FieldMap`) et crée les
//! champs manquants dans la couche destination.

use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::source::Layer;
use crate::types::{FieldSpec, FieldType};

/// Correspondance index source → index destination (`None` = non transposé)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldMap(Vec<Option<usize>>);

impl FieldMap {
    /// Table où aucun champ n'est transposé
    pub fn unmapped(source_fields: usize) -> Self {
        Self(vec![None; source_fields])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, source_index: usize) -> Option<usize> {
        self.0.get(source_index).copied().flatten()
    }

    pub fn set(&mut self, source_index: usize, destination_index: usize) {
        if let Some(slot) = self.0.get_mut(source_index) {
            *slot = Some(destination_index);
        }
    }

    /// Paires (source, destination) transposées
    pub fn mapped(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(src, dst)| dst.map(|dst| (src, dst)))
    }

    pub fn as_slice(&self) -> &[Option<usize>] {
        &self.0
    }
}

/// Types de champs à convertir en chaîne
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StringConversion {
    #[default]
    Disabled,
    All,
    Types(Vec<FieldType>),
}

impl StringConversion {
    pub fn applies_to(&self, field_type: FieldType) -> bool {
        match self {
            StringConversion::Disabled => false,
            StringConversion::All => true,
            StringConversion::Types(types) => types.contains(&field_type),
        }
    }
}

impl FromStr for StringConversion {
    type Err = PipelineError;

    /// Liste séparée par virgules ou espaces (`Integer,Real`), ou `All`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut types = Vec::new();
        for token in s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            if token.eq_ignore_ascii_case("All") {
                return Ok(StringConversion::All);
            }
            types.push(token.parse::<FieldType>()?);
        }
        if types.is_empty() {
            return Err(PipelineError::invalid_option(
                "field type list to convert to string is empty",
            ));
        }
        Ok(StringConversion::Types(types))
    }
}

/// Paramètres de réconciliation
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRequest<'a> {
    /// Champs sélectionnés (tous si `None`)
    pub selected: Option<&'a [String]>,
    pub to_string: Option<&'a StringConversion>,
    /// La couche destination existait et on y ajoute
    pub append: bool,
    pub skip_failures: bool,
    /// Un filtre attributaire est actif sur la source
    pub attribute_filter_active: bool,
    /// Champ source lu pour l'élévation (jamais ignoré)
    pub z_field: Option<&'a str>,
}

/// Résultat de la réconciliation
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub field_map: FieldMap,
    /// Champs créés dans la destination
    pub created: Vec<FieldSpec>,
    /// Champs sélectionnés absents de la source (avec skip-failures)
    pub missing: Vec<String>,
    /// Champs source que le driver ne lira pas
    pub ignored: Vec<String>,
}

fn find_field(schema: &[FieldSpec], name: &str) -> Option<usize> {
    schema.iter().position(|f| f.name.eq_ignore_ascii_case(name))
}

/// Construit la correspondance des champs et crée les champs manquants
pub fn reconcile(
    source: &mut dyn Layer,
    destination: &mut dyn Layer,
    request: &SchemaRequest<'_>,
) -> Result<Reconciliation, PipelineError> {
    let source_schema = source.schema().to_vec();
    let mut result = Reconciliation {
        field_map: FieldMap::unmapped(source_schema.len()),
        ..Default::default()
    };

    if request.append {
        for (index, field) in source_schema.iter().enumerate() {
            if let Some(dst) = destination.field_index(&field.name) {
                result.field_map.set(index, dst);
            }
        }
        debug!(
            layer = destination.name(),
            mapped = result.field_map.mapped().count(),
            "Fields matched by name for append"
        );
        return Ok(result);
    }

    let selected_indices = match request.selected {
        Some(names) => {
            let mut indices = Vec::with_capacity(names.len());
            for name in names {
                match find_field(&source_schema, name) {
                    Some(index) => indices.push(index),
                    None if request.skip_failures => {
                        warn!(
                            layer = source.name(),
                            field = %name,
                            "Selected field not found in source layer, skipping"
                        );
                        result.missing.push(name.clone());
                    }
                    None => {
                        return Err(PipelineError::MissingField {
                            layer: source.name().to_string(),
                            field: name.clone(),
                        });
                    }
                }
            }
            indices
        }
        None => (0..source_schema.len()).collect(),
    };

    for index in selected_indices {
        let mut spec = source_schema[index].clone();
        if request
            .to_string
            .is_some_and(|conversion| conversion.applies_to(spec.field_type))
        {
            spec.field_type = FieldType::String;
        }

        if let Some(existing) = destination.field_index(&spec.name) {
            result.field_map.set(index, existing);
            continue;
        }

        let before = destination.schema().len();
        let created = destination.create_field(&spec);
        let after = destination.schema().len();

        match created {
            Ok(()) if after == before + 1 => {
                result.field_map.set(index, before);
                result.created.push(spec);
            }
            outcome => {
                let error = match outcome {
                    Err(err) => PipelineError::layer(destination.name(), err),
                    Ok(()) => PipelineError::FieldCreation {
                        layer: destination.name().to_string(),
                        field: spec.name.clone(),
                    },
                };
                if !request.skip_failures {
                    return Err(error);
                }
                warn!(error = %error, "Field not created, values will be dropped");
            }
        }
    }

    if let Some(names) = request.selected {
        if source.supports_ignored_fields() && !request.attribute_filter_active {
            let ignored: Vec<String> = source_schema
                .iter()
                .map(|f| &f.name)
                .filter(|name| !names.iter().any(|n| n.eq_ignore_ascii_case(name)))
                .filter(|name| {
                    !request
                        .z_field
                        .is_some_and(|z| z.eq_ignore_ascii_case(name))
                })
                .cloned()
                .collect();

            if !ignored.is_empty() {
                source
                    .set_ignored_fields(&ignored)
                    .map_err(|e| PipelineError::layer(source.name(), e))?;
                debug!(layer = source.name(), ?ignored, "Unselected fields ignored");
            }
            result.ignored = ignored;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLayer;
    use crate::types::GeometryKind;

    fn source() -> MemoryLayer {
        MemoryLayer::new("src", GeometryKind::UNKNOWN, None).with_fields(vec![
            FieldSpec::new("id", FieldType::Integer),
            FieldSpec::new("name", FieldType::String).with_width(32, 0),
            FieldSpec::new("height", FieldType::Real),
        ])
    }

    fn empty_destination() -> MemoryLayer {
        MemoryLayer::new("dst", GeometryKind::UNKNOWN, None)
    }

    #[test]
    fn test_all_fields_created() {
        let mut src = source();
        let mut dst = empty_destination();
        let result = reconcile(&mut src, &mut dst, &SchemaRequest::default()).unwrap();

        assert_eq!(result.field_map.as_slice(), &[Some(0), Some(1), Some(2)]);
        assert_eq!(dst.schema().len(), 3);
        assert_eq!(dst.schema()[1].width, 32);
    }

    #[test]
    fn test_selection_and_ignored_fields() {
        let mut src = source();
        let mut dst = empty_destination();
        let selected = vec!["HEIGHT".to_string()];
        let request = SchemaRequest {
            selected: Some(&selected),
            ..Default::default()
        };
        let result = reconcile(&mut src, &mut dst, &request).unwrap();

        assert_eq!(result.field_map.as_slice(), &[None, None, Some(0)]);
        assert_eq!(result.ignored, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(src.ignored_fields(), vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_z_field_never_ignored_and_filter_disables_ignoring() {
        let selected = vec!["name".to_string()];

        let mut src = source();
        let mut dst = empty_destination();
        let request = SchemaRequest {
            selected: Some(&selected),
            z_field: Some("height"),
            ..Default::default()
        };
        let result = reconcile(&mut src, &mut dst, &request).unwrap();
        assert_eq!(result.ignored, vec!["id".to_string()]);

        let mut src = source();
        let mut dst = empty_destination();
        let request = SchemaRequest {
            selected: Some(&selected),
            attribute_filter_active: true,
            ..Default::default()
        };
        let result = reconcile(&mut src, &mut dst, &request).unwrap();
        assert!(result.ignored.is_empty());
        assert!(src.ignored_fields().is_empty());
    }

    #[test]
    fn test_missing_selected_field() {
        let selected = vec!["name".to_string(), "ghost".to_string()];

        let mut src = source();
        let mut dst = empty_destination();
        let request = SchemaRequest {
            selected: Some(&selected),
            ..Default::default()
        };
        let err = reconcile(&mut src, &mut dst, &request).unwrap_err();
        assert!(matches!(err, PipelineError::MissingField { ref field, .. } if field == "ghost"));

        let mut dst = empty_destination();
        let request = SchemaRequest {
            selected: Some(&selected),
            skip_failures: true,
            ..Default::default()
        };
        let result = reconcile(&mut src, &mut dst, &request).unwrap();
        assert_eq!(result.missing, vec!["ghost".to_string()]);
        assert_eq!(result.field_map.get(1), Some(0));
    }

    #[test]
    fn test_append_matches_by_name() {
        let mut src = source();
        let mut dst = MemoryLayer::new("dst", GeometryKind::UNKNOWN, None).with_fields(vec![
            FieldSpec::new("height", FieldType::Real),
            FieldSpec::new("id", FieldType::Integer),
        ]);
        let request = SchemaRequest {
            append: true,
            ..Default::default()
        };
        let result = reconcile(&mut src, &mut dst, &request).unwrap();

        assert_eq!(result.field_map.as_slice(), &[Some(1), None, Some(0)]);
        assert!(result.created.is_empty());
        assert_eq!(dst.schema().len(), 2);
    }

    #[test]
    fn test_string_conversion() {
        let conversion: StringConversion = "Integer,Real".parse().unwrap();
        let mut src = source();
        let mut dst = empty_destination();
        let request = SchemaRequest {
            to_string: Some(&conversion),
            ..Default::default()
        };
        reconcile(&mut src, &mut dst, &request).unwrap();

        assert!(dst.schema().iter().all(|f| f.field_type == FieldType::String));
        assert_eq!("all".parse::<StringConversion>().unwrap(), StringConversion::All);
        assert!("Blob".parse::<StringConversion>().is_err());
    }

    #[test]
    fn test_existing_destination_field_reused() {
        let mut src = source();
        let mut dst = MemoryLayer::new("dst", GeometryKind::UNKNOWN, None)
            .with_fields(vec![FieldSpec::new("name", FieldType::String)]);
        let result = reconcile(&mut src, &mut dst, &SchemaRequest::default()).unwrap();

        assert_eq!(result.field_map.get(1), Some(0));
        assert_eq!(dst.schema().len(), 3);
        assert_eq!(result.created.len(), 2);
    }
}
