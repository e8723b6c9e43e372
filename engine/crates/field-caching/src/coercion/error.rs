use async_graphql_value::ConstValue;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputValueError {
    #[error("Found a null where we expected a {expected}{path}")]
    UnexpectedNull { expected: String, path: String },
    #[error("Found a {actual} value where we expected a '{name}' input object{path}")]
    MissingObject {
        name: String,
        actual: ValueKind,
        path: String,
    },
    #[error("Found a {actual} value where we expected a {expected} scalar{path}")]
    IncorrectScalarType {
        actual: ValueKind,
        expected: String,
        path: String,
    },
    #[error("Found value {actual} which cannot be coerced into a {expected} scalar{path}")]
    IncorrectScalarValue {
        actual: String,
        expected: String,
        path: String,
    },
    #[error("Found a {actual} value where we expected a {r#enum} enum value{path}")]
    IncorrectEnumValueType {
        r#enum: String,
        actual: ValueKind,
        path: String,
    },
    #[error("Unknown enum value '{value}' for enum {r#enum}{path}")]
    UnknownEnumValue {
        r#enum: String,
        value: String,
        path: String,
    },
    #[error("Input object {input_object} does not have a field named '{name}'{path}")]
    UnknownInputField {
        input_object: String,
        name: String,
        path: String,
    },
    #[error("Type {name} cannot be used as an input{path}")]
    NotAnInputType { name: String, path: String },
    #[error("Missing argument '{name}' of required type '{ty}'")]
    MissingArgument { name: String, ty: String },
    #[error("Variable ${name} of required type '{ty}' was not provided")]
    MissingVariable { name: String, ty: String },
    #[error("Variable ${name} got an invalid value: {error}")]
    InvalidVariable { name: String, error: Box<InputValueError> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ValueKind {
    String,
    Integer,
    Enum,
    Float,
    Object,
    Boolean,
    List,
    Null,
}

impl From<&ConstValue> for ValueKind {
    fn from(value: &ConstValue) -> Self {
        match value {
            ConstValue::Null => ValueKind::Null,
            ConstValue::Number(number) if number.is_f64() => ValueKind::Float,
            ConstValue::Number(_) => ValueKind::Integer,
            ConstValue::String(_) => ValueKind::String,
            ConstValue::Boolean(_) => ValueKind::Boolean,
            ConstValue::Binary(_) => ValueKind::String,
            ConstValue::Enum(_) => ValueKind::Enum,
            ConstValue::List(_) => ValueKind::List,
            ConstValue::Object(_) => ValueKind::Object,
        }
    }
}
