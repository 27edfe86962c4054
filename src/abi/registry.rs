use std::collections::{HashMap, HashSet};

use tracing::{event, Level};

use crate::abi::{check_abi_version, AbiDef, StructDef};
use crate::error::ProtocolError;

/// Types every schema can reference without declaring them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Int128,
    Uint128,
    Varint32,
    Varuint32,
    Float32,
    Float64,
    Float128,
    TimePoint,
    TimePointSec,
    BlockTimestamp,
    Name,
    Bytes,
    String,
    Checksum160,
    Checksum256,
    Checksum512,
    PublicKey,
    Signature,
    SymbolCode,
    Symbol,
    Asset,
    ExtendedAsset,
}

impl Builtin {
    pub const ALL: [(&'static str, Builtin); 31] = [
        ("bool", Builtin::Bool),
        ("int8", Builtin::Int8),
        ("uint8", Builtin::Uint8),
        ("int16", Builtin::Int16),
        ("uint16", Builtin::Uint16),
        ("int32", Builtin::Int32),
        ("uint32", Builtin::Uint32),
        ("int64", Builtin::Int64),
        ("uint64", Builtin::Uint64),
        ("int128", Builtin::Int128),
        ("uint128", Builtin::Uint128),
        ("varint32", Builtin::Varint32),
        ("varuint32", Builtin::Varuint32),
        ("float32", Builtin::Float32),
        ("float64", Builtin::Float64),
        ("float128", Builtin::Float128),
        ("time_point", Builtin::TimePoint),
        ("time_point_sec", Builtin::TimePointSec),
        ("block_timestamp_type", Builtin::BlockTimestamp),
        ("name", Builtin::Name),
        ("bytes", Builtin::Bytes),
        ("string", Builtin::String),
        ("checksum160", Builtin::Checksum160),
        ("checksum256", Builtin::Checksum256),
        ("checksum512", Builtin::Checksum512),
        ("public_key", Builtin::PublicKey),
        ("signature", Builtin::Signature),
        ("symbol_code", Builtin::SymbolCode),
        ("symbol", Builtin::Symbol),
        ("asset", Builtin::Asset),
        ("extended_asset", Builtin::ExtendedAsset),
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub type_name: String,
}

/// A resolved type. Structs already contain the fields of their bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Builtin(Builtin),
    Alias(String),
    Struct(Vec<Field>),
    Variant(Vec<String>),
}

/// Shape of a type reference once its trailing modifier is peeled off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeExpr<'a> {
    Named(&'a str),
    Optional(&'a str),
    Array(&'a str),
    Extension(&'a str),
}

impl<'a> TypeExpr<'a> {
    pub(crate) fn parse(name: &'a str) -> Self {
        if let Some(inner) = name.strip_suffix('$') {
            TypeExpr::Extension(inner)
        } else if let Some(inner) = name.strip_suffix("[]") {
            TypeExpr::Array(inner)
        } else if let Some(inner) = name.strip_suffix('?') {
            TypeExpr::Optional(inner)
        } else {
            TypeExpr::Named(name)
        }
    }
}

/// Upper bound on alias chains and struct inheritance depth.
const MAX_CHAIN: usize = 32;

///
/// Map from type name to layout, built once from the schema document a node
/// sends at the start of a session and read-only afterwards. Every name
/// reachable from a declaration is guaranteed to resolve.
///
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    version: String,
    types: HashMap<String, AbiType>,
    tables: HashMap<String, String>,
}

impl TypeRegistry {
    pub fn from_json(text: &str) -> Result<TypeRegistry, ProtocolError> {
        TypeRegistry::from_def(AbiDef::from_json(text)?)
    }

    pub fn from_def(abi: AbiDef) -> Result<TypeRegistry, ProtocolError> {
        check_abi_version(&abi.version)?;

        let mut types: HashMap<String, AbiType> = Builtin::ALL
            .iter()
            .map(|(name, builtin)| (name.to_string(), AbiType::Builtin(*builtin)))
            .collect();

        let declare = |types: &mut HashMap<String, AbiType>, name: &str, abi_type: AbiType| {
            if name.is_empty() || TypeExpr::parse(name) != TypeExpr::Named(name) {
                return Err(ProtocolError::InvalidAbi(format!(
                    "invalid type name \"{}\"",
                    name
                )));
            }
            if types.insert(name.to_string(), abi_type).is_some() {
                return Err(ProtocolError::Redefinition(name.to_string()));
            }
            Ok(())
        };

        for alias in &abi.types {
            declare(
                &mut types,
                &alias.new_type_name,
                AbiType::Alias(alias.type_name.clone()),
            )?;
        }
        let struct_defs: HashMap<&str, &StructDef> =
            abi.structs.iter().map(|s| (s.name.as_str(), s)).collect();
        for def in &abi.structs {
            declare(&mut types, &def.name, AbiType::Struct(vec![]))?;
        }
        for variant in &abi.variants {
            declare(
                &mut types,
                &variant.name,
                AbiType::Variant(variant.types.clone()),
            )?;
        }

        //
        // flatten base structs into their children
        //
        for def in &abi.structs {
            let fields = flatten_fields(def, &struct_defs, &types)?;
            types.insert(def.name.clone(), AbiType::Struct(fields));
        }

        let mut registry = TypeRegistry {
            version: abi.version,
            types,
            tables: HashMap::new(),
        };
        registry.validate()?;

        // table metadata is only used to label deltas, so a bad entry is dropped
        // instead of failing the schema
        let mut tables = HashMap::new();
        for table in &abi.tables {
            match registry.check_ref(&table.type_name) {
                Ok(()) => {
                    tables.insert(table.name.clone(), table.type_name.clone());
                }
                Err(err) => {
                    event!(Level::WARN, "ignoring table {}: {}", table.name, err);
                }
            }
        }
        registry.tables = tables;
        Ok(registry)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&AbiType, ProtocolError> {
        self.types
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownType(name.to_string()))
    }

    /// Follows aliases until a reference that is not an alias is reached.
    /// The result may still carry a modifier (`?`, `[]`, `$`).
    pub fn resolve<'a>(&'a self, name: &'a str) -> Result<&'a str, ProtocolError> {
        let mut current = name;
        for _ in 0..MAX_CHAIN {
            match TypeExpr::parse(current) {
                TypeExpr::Named(named) => match self.get(named)? {
                    AbiType::Alias(target) => current = target,
                    _ => return Ok(current),
                },
                _ => return Ok(current),
            }
        }
        Err(ProtocolError::InvalidAbi(format!(
            "alias chain too deep at {}",
            name
        )))
    }

    pub fn variant_cases(&self, variant: &str) -> Result<&[String], ProtocolError> {
        let resolved = self.resolve(variant)?;
        if let TypeExpr::Named(named) = TypeExpr::parse(resolved) {
            if let AbiType::Variant(cases) = self.get(named)? {
                return Ok(cases.as_slice());
            }
        }
        Err(ProtocolError::NotAVariant(variant.to_string()))
    }

    pub fn variant_case(&self, variant: &str, index: u32) -> Result<&str, ProtocolError> {
        self.variant_cases(variant)?
            .get(index as usize)
            .map(|case| case.as_str())
            .ok_or_else(|| ProtocolError::InvalidVariantIndex {
                variant: variant.to_string(),
                index,
            })
    }

    pub fn variant_index(&self, variant: &str, case: &str) -> Result<u32, ProtocolError> {
        self.variant_cases(variant)?
            .iter()
            .position(|c| c == case)
            .map(|index| index as u32)
            .ok_or_else(|| ProtocolError::MissingVariantCase {
                variant: variant.to_string(),
                case: case.to_string(),
            })
    }

    /// Row type of a table, used to decode `table_delta` rows.
    pub fn table_type(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(|t| t.as_str())
    }

    /// Checks that a type reference, modifiers included, names a known type.
    fn check_ref(&self, name: &str) -> Result<(), ProtocolError> {
        match TypeExpr::parse(name) {
            TypeExpr::Named(inner) => self.get(inner).map(|_| ()),
            TypeExpr::Optional(inner) | TypeExpr::Array(inner) | TypeExpr::Extension(inner) => {
                self.check_ref(inner)
            }
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        for (name, abi_type) in &self.types {
            match abi_type {
                AbiType::Builtin(_) => {}
                AbiType::Alias(target) => {
                    self.check_ref(target)?;
                    self.resolve(name)?;
                }
                AbiType::Struct(fields) => {
                    for field in fields {
                        self.check_ref(&field.type_name)?;
                    }
                }
                AbiType::Variant(cases) => {
                    for case in cases {
                        self.check_ref(case)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn flatten_fields(
    def: &StructDef,
    struct_defs: &HashMap<&str, &StructDef>,
    types: &HashMap<String, AbiType>,
) -> Result<Vec<Field>, ProtocolError> {
    let mut chain = vec![def];
    let mut seen = HashSet::new();
    seen.insert(def.name.as_str());
    let mut current = def;
    while !current.base.is_empty() {
        let base = resolve_struct_name(&current.base, types)?;
        let base_def = struct_defs.get(base).copied().ok_or_else(|| {
            ProtocolError::InvalidAbi(format!("base {} of {} is not a struct", base, def.name))
        })?;
        if !seen.insert(base) || chain.len() >= MAX_CHAIN {
            return Err(ProtocolError::InvalidAbi(format!(
                "recursive base in {}",
                def.name
            )));
        }
        chain.push(base_def);
        current = base_def;
    }
    Ok(chain
        .iter()
        .rev()
        .flat_map(|s| s.fields.iter())
        .map(|f| Field {
            name: f.name.clone(),
            type_name: f.type_name.clone(),
        })
        .collect())
}

fn resolve_struct_name<'a>(
    name: &'a str,
    types: &'a HashMap<String, AbiType>,
) -> Result<&'a str, ProtocolError> {
    let mut current = name;
    for _ in 0..MAX_CHAIN {
        match types.get(current) {
            Some(AbiType::Alias(target)) => current = target,
            Some(_) => return Ok(current),
            None => return Err(ProtocolError::UnknownType(current.to_string())),
        }
    }
    Err(ProtocolError::InvalidAbi(format!(
        "alias chain too deep at {}",
        name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities::SHIP_ABI;

    fn abi(body: &str) -> String {
        format!(r#"{{"version": "eosio::abi/1.1", {}}}"#, body)
    }

    #[test]
    fn test_ship_abi_registry() {
        let registry = TypeRegistry::from_json(SHIP_ABI).unwrap();
        assert_eq!(registry.version(), "eosio::abi/1.1");
        assert!(registry.contains("block_position"));
        assert!(registry.len() > Builtin::ALL.len());
        assert_eq!(
            registry.variant_case("result", 1).unwrap(),
            "get_blocks_result_v0"
        );
        assert_eq!(
            registry
                .variant_index("request", "get_blocks_ack_request_v0")
                .unwrap(),
            2
        );
        assert_eq!(registry.table_type("account"), Some("account"));
    }

    #[test]
    fn test_unknown_type_lookup() {
        let registry = TypeRegistry::from_json(SHIP_ABI).unwrap();
        assert_eq!(
            registry.get("no_such_type"),
            Err(ProtocolError::UnknownType(String::from("no_such_type")))
        );
        assert!(matches!(
            registry.variant_case("result", 9),
            Err(ProtocolError::InvalidVariantIndex { index: 9, .. })
        ));
        assert!(matches!(
            registry.variant_cases("block_position"),
            Err(ProtocolError::NotAVariant(_))
        ));
    }

    #[test]
    fn test_base_fields_come_first() {
        let registry = TypeRegistry::from_json(&abi(
            r#""structs": [
                {"name": "child", "base": "parent", "fields": [{"name": "c", "type": "uint8"}]},
                {"name": "parent", "base": "", "fields": [{"name": "p", "type": "string"}]}
            ]"#,
        ))
        .unwrap();
        match registry.get("child").unwrap() {
            AbiType::Struct(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
                assert_eq!(names, vec!["p", "c"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_field_type_is_rejected() {
        let result = TypeRegistry::from_json(&abi(
            r#""structs": [{"name": "s", "fields": [{"name": "a", "type": "missing[]"}]}]"#,
        ));
        assert_eq!(
            result.unwrap_err(),
            ProtocolError::UnknownType(String::from("missing"))
        );
    }

    #[test]
    fn test_table_with_unknown_type_is_dropped() {
        let registry = TypeRegistry::from_json(&abi(
            r#""structs": [{"name": "row", "fields": [{"name": "a", "type": "uint8"}]}],
            "tables": [
                {"name": "good", "type": "row"},
                {"name": "bad", "type": "undeclared_row"}
            ]"#,
        ))
        .unwrap();
        assert_eq!(registry.table_type("good"), Some("row"));
        assert_eq!(registry.table_type("bad"), None);
    }

    #[test]
    fn test_redefinition_is_rejected() {
        let result = TypeRegistry::from_json(&abi(
            r#""types": [{"new_type_name": "uint32", "type": "uint64"}]"#,
        ));
        assert_eq!(
            result.unwrap_err(),
            ProtocolError::Redefinition(String::from("uint32"))
        );
    }

    #[test]
    fn test_alias_cycle_is_rejected() {
        let result = TypeRegistry::from_json(&abi(
            r#""types": [
                {"new_type_name": "a", "type": "b"},
                {"new_type_name": "b", "type": "a"}
            ]"#,
        ));
        assert!(matches!(result, Err(ProtocolError::InvalidAbi(_))));
    }

    #[test]
    fn test_recursive_base_is_rejected() {
        let result = TypeRegistry::from_json(&abi(
            r#""structs": [
                {"name": "a", "base": "b", "fields": []},
                {"name": "b", "base": "a", "fields": []}
            ]"#,
        ));
        assert!(matches!(result, Err(ProtocolError::InvalidAbi(_))));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let result = TypeRegistry::from_json(r#"{"version": "eosio::abi/9.0"}"#);
        assert!(matches!(
            result,
            Err(ProtocolError::UnsupportedAbiVersion(_))
        ));
    }

    #[test]
    fn test_type_expr_parse() {
        assert_eq!(TypeExpr::parse("uint8[]?"), TypeExpr::Optional("uint8[]"));
        assert_eq!(TypeExpr::parse("uint8[]"), TypeExpr::Array("uint8"));
        assert_eq!(TypeExpr::parse("foo$"), TypeExpr::Extension("foo"));
        assert_eq!(TypeExpr::parse("foo"), TypeExpr::Named("foo"));
    }
}
