//! Read-only schema model.
//!
//! A [`SchemaMeta`] is built once per endpoint, either from the JSON result of an
//! introspection query or from SDL text, and then shared by every document that
//! targets that endpoint. Lookups never mutate it.
use std::fmt;

use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::error::SchemaError;

/// Introspection `__TypeKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

/// Reference to a type, as found on fields, arguments and variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTypeRef", into = "RawTypeRef")]
pub enum TypeRef {
    Named { name: String, kind: TypeKind },
    NonNull(Box<TypeRef>),
    List(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>, kind: TypeKind) -> Self {
        Self::Named {
            name: name.into(),
            kind,
        }
    }

    pub fn non_null(inner: TypeRef) -> Self {
        Self::NonNull(Box::new(inner))
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    /// Name of the innermost named type.
    pub fn name(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::NonNull(inner) | Self::List(inner) => inner.name(),
        }
    }

    /// Kind of the innermost named type.
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Named { kind, .. } => *kind,
            Self::NonNull(inner) | Self::List(inner) => inner.kind(),
        }
    }

    /// Whether the outermost non-null-stripped wrapper is a list.
    pub fn is_list(&self) -> bool {
        match self {
            Self::List(_) => true,
            Self::NonNull(inner) => inner.is_list(),
            Self::Named { .. } => false,
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { name, .. } => write!(f, "{name}"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
            Self::List(inner) => write!(f, "[{inner}]"),
        }
    }
}

// Introspection shape: `{"kind": "NON_NULL", "name": null, "ofType": {...}}`
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTypeRef {
    kind: TypeKind,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    of_type: Option<Box<RawTypeRef>>,
}

impl TryFrom<RawTypeRef> for TypeRef {
    type Error = SchemaError;

    fn try_from(raw: RawTypeRef) -> Result<Self, Self::Error> {
        match raw.kind {
            TypeKind::NonNull | TypeKind::List => {
                let inner = raw.of_type.ok_or_else(|| {
                    SchemaError::InvalidTypeRef(format!("{:?} without ofType", raw.kind))
                })?;
                let inner = TypeRef::try_from(*inner)?;
                Ok(if raw.kind == TypeKind::List {
                    TypeRef::list(inner)
                } else {
                    TypeRef::non_null(inner)
                })
            }
            kind => {
                let name = raw.name.ok_or_else(|| {
                    SchemaError::InvalidTypeRef(format!("{kind:?} type reference without a name"))
                })?;
                Ok(TypeRef::Named { name, kind })
            }
        }
    }
}

impl From<TypeRef> for RawTypeRef {
    fn from(value: TypeRef) -> Self {
        match value {
            TypeRef::Named { name, kind } => RawTypeRef {
                kind,
                name: Some(name),
                of_type: None,
            },
            TypeRef::NonNull(inner) => RawTypeRef {
                kind: TypeKind::NonNull,
                name: None,
                of_type: Some(Box::new((*inner).into())),
            },
            TypeRef::List(inner) => RawTypeRef {
                kind: TypeKind::List,
                name: None,
                of_type: Some(Box::new((*inner).into())),
            },
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Argument or input object field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub type_: TypeRef,
    #[serde(default)]
    pub default_value: Option<String>,
}

/// Field definition of an object or interface type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "args", default, deserialize_with = "null_as_default")]
    pub arguments: Vec<ArgumentMeta>,
    #[serde(rename = "type")]
    pub type_: TypeRef,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, type_: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            type_,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<ArgumentMeta>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.arguments.iter().any(|arg| arg.name == name)
    }

    pub fn type_of_arg(&self, name: &str) -> Result<&TypeRef, SchemaError> {
        self.arguments
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| &arg.type_)
            .ok_or_else(|| SchemaError::UnknownArgument {
                field: self.name.clone(),
                argument: name.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<FieldMeta>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interfaces: Vec<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<FieldMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnionMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub possible_types: Vec<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValueMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub enum_values: Vec<EnumValueMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputObjectMeta {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_fields: Vec<ArgumentMeta>,
}

/// Metadata of a named type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeMeta {
    Scalar(ScalarMeta),
    Object(ObjectMeta),
    Interface(InterfaceMeta),
    Union(UnionMeta),
    Enum(EnumMeta),
    InputObject(InputObjectMeta),
}

impl TypeMeta {
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(meta) => &meta.name,
            Self::Object(meta) => &meta.name,
            Self::Interface(meta) => &meta.name,
            Self::Union(meta) => &meta.name,
            Self::Enum(meta) => &meta.name,
            Self::InputObject(meta) => &meta.name,
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Scalar(_) => TypeKind::Scalar,
            Self::Object(_) => TypeKind::Object,
            Self::Interface(_) => TypeKind::Interface,
            Self::Union(_) => TypeKind::Union,
            Self::Enum(_) => TypeKind::Enum,
            Self::InputObject(_) => TypeKind::InputObject,
        }
    }

    /// Fields of an object or interface type.
    pub fn fields(&self) -> Option<&[FieldMeta]> {
        match self {
            Self::Object(meta) => Some(&meta.fields),
            Self::Interface(meta) => Some(&meta.fields),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Result<&FieldMeta, SchemaError> {
        self.fields()
            .ok_or_else(|| SchemaError::NotAnObject(self.name().to_string()))?
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: self.name().to_string(),
                field: name.to_string(),
            })
    }

    pub fn input_field(&self, name: &str) -> Result<&ArgumentMeta, SchemaError> {
        let Self::InputObject(meta) = self else {
            return Err(SchemaError::NotAnInputObject(self.name().to_string()));
        };
        meta.input_fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| SchemaError::UnknownInputField {
                type_name: meta.name.clone(),
                field: name.to_string(),
            })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionSchema {
    query_type: RootTypeName,
    #[serde(default)]
    mutation_type: Option<RootTypeName>,
    types: Vec<TypeMeta>,
}

#[derive(Deserialize)]
struct RootTypeName {
    name: String,
}

/// In-memory schema of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMeta {
    pub query_type: String,
    pub mutation_type: Option<String>,
    pub type_map: IndexMap<String, TypeMeta>,
}

impl SchemaMeta {
    /// Build a schema from an introspection result.
    ///
    /// Accepts the `data` of an introspection query (`{"__schema": {...}}`) as well as
    /// the bare `__schema` object.
    pub fn from_introspection(value: serde_json::Value) -> Result<Self, SchemaError> {
        let value = match value {
            serde_json::Value::Object(mut object) if object.contains_key("__schema") => object
                .remove("__schema")
                .unwrap_or(serde_json::Value::Null),
            other => other,
        };
        let schema: IntrospectionSchema =
            serde_json::from_value(value).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Ok(Self {
            query_type: schema.query_type.name,
            mutation_type: schema.mutation_type.map(|root| root.name),
            type_map: schema
                .types
                .into_iter()
                .map(|meta| (meta.name().to_string(), meta))
                .collect(),
        })
    }

    /// Build a schema from SDL text.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] if the SDL does not parse or validate.
    pub fn parse_sdl(sdl: &str) -> Result<Self, SchemaError> {
        let schema = Schema::parse_and_validate(sdl, "schema.graphql")
            .map_err(|e| SchemaError::Parse(e.errors.to_string()))?;
        let query_type = schema
            .schema_definition
            .query
            .as_ref()
            .map(|root| root.name.to_string())
            .ok_or_else(|| SchemaError::Parse("schema has no query root type".to_string()))?;
        let mutation_type = schema
            .schema_definition
            .mutation
            .as_ref()
            .map(|root| root.name.to_string());

        let type_map = schema
            .types
            .iter()
            .map(|(name, ty)| (name.to_string(), sdl::type_meta(&schema, ty)))
            .collect();

        Ok(Self {
            query_type,
            mutation_type,
            type_map,
        })
    }

    pub fn type_of(&self, name: &str) -> Result<&TypeMeta, SchemaError> {
        self.type_map
            .get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_string()))
    }

    pub fn type_of_typeref(&self, type_ref: &TypeRef) -> Result<&TypeMeta, SchemaError> {
        self.type_of(type_ref.name())
    }

    pub fn field(&self, type_name: &str, field: &str) -> Result<&FieldMeta, SchemaError> {
        self.type_of(type_name)?.field(field)
    }

    /// Field of the query root type.
    pub fn query_field(&self, field: &str) -> Result<&FieldMeta, SchemaError> {
        self.field(&self.query_type, field)
    }

    pub fn type_of_field(&self, type_name: &str, field: &str) -> Result<&TypeMeta, SchemaError> {
        self.type_of_typeref(&self.field(type_name, field)?.type_)
    }

    /// Declare an extra field on an object or interface type, replacing a field of the
    /// same name.
    pub fn add_field(&mut self, type_name: &str, field: FieldMeta) -> Result<(), SchemaError> {
        let fields = match self.type_map.get_mut(type_name) {
            Some(TypeMeta::Object(meta)) => &mut meta.fields,
            Some(TypeMeta::Interface(meta)) => &mut meta.fields,
            Some(_) => return Err(SchemaError::NotAnObject(type_name.to_string())),
            None => return Err(SchemaError::UnknownType(type_name.to_string())),
        };
        fields.retain(|existing| existing.name != field.name);
        fields.push(field);
        Ok(())
    }

    /// Type of the input field reached by walking `path` through nested input objects,
    /// starting at `input_object`.
    pub fn type_of_input_object_path(
        &self,
        input_object: &str,
        path: &[String],
    ) -> Result<&TypeRef, SchemaError> {
        let mut current = self.type_of(input_object)?;
        let mut found = None;
        for segment in path {
            if let Some(type_ref) = found.take() {
                current = self.type_of_typeref(type_ref)?;
            }
            found = Some(&current.input_field(segment)?.type_);
        }
        found.ok_or_else(|| SchemaError::NotAnInputObject(input_object.to_string()))
    }
}

mod sdl {
    use super::*;

    fn description(description: &Option<apollo_compiler::Node<str>>) -> Option<String> {
        description.as_ref().map(|d| d.to_string())
    }

    fn kind(schema: &Schema, name: &str) -> TypeKind {
        match schema.types.get(name) {
            Some(ExtendedType::Object(_)) => TypeKind::Object,
            Some(ExtendedType::Interface(_)) => TypeKind::Interface,
            Some(ExtendedType::Union(_)) => TypeKind::Union,
            Some(ExtendedType::Enum(_)) => TypeKind::Enum,
            Some(ExtendedType::InputObject(_)) => TypeKind::InputObject,
            Some(ExtendedType::Scalar(_)) | None => TypeKind::Scalar,
        }
    }

    pub(super) fn type_ref(schema: &Schema, ty: &ast::Type) -> TypeRef {
        match ty {
            ast::Type::Named(name) => TypeRef::named(name.as_str(), kind(schema, name.as_str())),
            ast::Type::NonNullNamed(name) => {
                TypeRef::non_null(TypeRef::named(name.as_str(), kind(schema, name.as_str())))
            }
            ast::Type::List(inner) => TypeRef::list(type_ref(schema, inner)),
            ast::Type::NonNullList(inner) => {
                TypeRef::non_null(TypeRef::list(type_ref(schema, inner)))
            }
        }
    }

    fn argument(schema: &Schema, def: &ast::InputValueDefinition) -> ArgumentMeta {
        ArgumentMeta {
            name: def.name.to_string(),
            description: description(&def.description),
            type_: type_ref(schema, &def.ty),
            default_value: def.default_value.as_ref().map(|value| value.to_string()),
        }
    }

    fn field(schema: &Schema, def: &ast::FieldDefinition) -> FieldMeta {
        FieldMeta {
            name: def.name.to_string(),
            description: description(&def.description),
            arguments: def
                .arguments
                .iter()
                .map(|arg| argument(schema, arg))
                .collect(),
            type_: type_ref(schema, &def.ty),
        }
    }

    pub(super) fn type_meta(schema: &Schema, ty: &ExtendedType) -> TypeMeta {
        match ty {
            ExtendedType::Scalar(ty) => TypeMeta::Scalar(ScalarMeta {
                name: ty.name.to_string(),
                description: description(&ty.description),
            }),
            ExtendedType::Object(ty) => TypeMeta::Object(ObjectMeta {
                name: ty.name.to_string(),
                description: description(&ty.description),
                fields: ty.fields.values().map(|def| field(schema, def)).collect(),
                interfaces: ty
                    .implements_interfaces
                    .iter()
                    .map(|name| TypeRef::named(name.name.as_str(), TypeKind::Interface))
                    .collect(),
            }),
            ExtendedType::Interface(ty) => TypeMeta::Interface(InterfaceMeta {
                name: ty.name.to_string(),
                description: description(&ty.description),
                fields: ty.fields.values().map(|def| field(schema, def)).collect(),
            }),
            ExtendedType::Union(ty) => TypeMeta::Union(UnionMeta {
                name: ty.name.to_string(),
                description: description(&ty.description),
                possible_types: ty
                    .members
                    .iter()
                    .map(|name| TypeRef::named(name.name.as_str(), TypeKind::Object))
                    .collect(),
            }),
            ExtendedType::Enum(ty) => TypeMeta::Enum(EnumMeta {
                name: ty.name.to_string(),
                description: description(&ty.description),
                enum_values: ty
                    .values
                    .values()
                    .map(|value| EnumValueMeta {
                        name: value.value.to_string(),
                        description: description(&value.description),
                    })
                    .collect(),
            }),
            ExtendedType::InputObject(ty) => TypeMeta::InputObject(InputObjectMeta {
                name: ty.name.to_string(),
                description: description(&ty.description),
                input_fields: ty
                    .fields
                    .values()
                    .map(|def| argument(schema, def))
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn introspection() -> serde_json::Value {
        json!({
            "__schema": {
                "queryType": {"name": "Query"},
                "mutationType": null,
                "types": [
                    {
                        "kind": "OBJECT",
                        "name": "Query",
                        "description": null,
                        "fields": [{
                            "name": "swaps",
                            "description": null,
                            "args": [{
                                "name": "first",
                                "description": null,
                                "type": {"kind": "SCALAR", "name": "Int", "ofType": null},
                                "defaultValue": "100"
                            }],
                            "type": {
                                "kind": "NON_NULL",
                                "name": null,
                                "ofType": {
                                    "kind": "LIST",
                                    "name": null,
                                    "ofType": {
                                        "kind": "NON_NULL",
                                        "name": null,
                                        "ofType": {"kind": "OBJECT", "name": "Swap", "ofType": null}
                                    }
                                }
                            },
                            "isDeprecated": false,
                            "deprecationReason": null
                        }],
                        "inputFields": null,
                        "interfaces": [],
                        "enumValues": null,
                        "possibleTypes": null
                    },
                    {
                        "kind": "SCALAR",
                        "name": "BigDecimal",
                        "description": null,
                        "fields": null,
                        "inputFields": null,
                        "interfaces": null,
                        "enumValues": null,
                        "possibleTypes": null
                    },
                    {
                        "kind": "ENUM",
                        "name": "OrderDirection",
                        "description": null,
                        "fields": null,
                        "inputFields": null,
                        "interfaces": null,
                        "enumValues": [
                            {"name": "asc", "description": null, "isDeprecated": false},
                            {"name": "desc", "description": null, "isDeprecated": false}
                        ],
                        "possibleTypes": null
                    }
                ]
            }
        })
    }

    #[test]
    fn deserializes_introspection_result() {
        let schema = SchemaMeta::from_introspection(introspection()).unwrap();
        assert_eq!(schema.query_type, "Query");
        assert_eq!(schema.type_map.len(), 3);

        let swaps = schema.query_field("swaps").unwrap();
        assert_eq!(swaps.type_.to_string(), "[Swap!]!");
        assert!(swaps.type_.is_list());
        assert_eq!(swaps.type_.kind(), TypeKind::Object);
        assert_eq!(swaps.arguments[0].default_value.as_deref(), Some("100"));

        let TypeMeta::Enum(direction) = schema.type_of("OrderDirection").unwrap() else {
            panic!("expected an enum");
        };
        assert_eq!(direction.enum_values.len(), 2);
    }

    #[test]
    fn type_ref_round_trips_through_introspection_shape() {
        let type_ref = TypeRef::non_null(TypeRef::list(TypeRef::named("Int", TypeKind::Scalar)));
        let json = serde_json::to_value(&type_ref).unwrap();
        assert_eq!(json["kind"], "NON_NULL");
        assert_eq!(json["ofType"]["ofType"]["name"], "Int");
        let back: TypeRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, type_ref);
    }

    #[test]
    fn rejects_wrapper_without_inner_type() {
        let err = serde_json::from_value::<TypeRef>(json!({"kind": "LIST", "name": null}));
        assert!(err.is_err());
    }

    #[test]
    fn parses_sdl_and_walks_input_objects() {
        let schema = SchemaMeta::parse_sdl(
            r#"
            type Query { tokens(where: Token_filter): [Token!]! }
            type Token { id: ID! symbol: String! pool: Pool }
            type Pool { id: ID! }
            input Token_filter { symbol_gt: String pool_: Pool_filter }
            input Pool_filter { id_gt: ID }
            "#,
        )
        .unwrap();

        assert_eq!(schema.query_type, "Query");
        let tokens = schema.query_field("tokens").unwrap();
        assert_eq!(tokens.type_.to_string(), "[Token!]!");
        assert_eq!(tokens.type_of_arg("where").unwrap().name(), "Token_filter");

        let path = ["pool_".to_string(), "id_gt".to_string()];
        let ty = schema
            .type_of_input_object_path("Token_filter", &path)
            .unwrap();
        assert_eq!(ty.name(), "ID");

        assert_eq!(
            schema.type_of_field("Token", "pool").unwrap().kind(),
            TypeKind::Object
        );
        assert!(matches!(
            schema.field("Token", "price"),
            Err(SchemaError::UnknownField { .. })
        ));
    }

    #[test]
    fn invalid_sdl_is_a_parse_error() {
        let err = SchemaMeta::parse_sdl("type Query { a: Missing }").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn add_field_declares_synthetic_fields() {
        let mut schema = SchemaMeta::parse_sdl("type Query { a: Int } scalar BigDecimal").unwrap();
        let price = FieldMeta::new("price", TypeRef::named("Float", TypeKind::Scalar));
        schema.add_field("Query", price.clone()).unwrap();
        assert_eq!(schema.field("Query", "price").unwrap(), &price);
        assert!(matches!(
            schema.add_field("BigDecimal", price),
            Err(SchemaError::NotAnObject(_))
        ));
    }
}
