use std::fmt;

/// Value types of the language. `int` is the only type a value can have;
/// `void` exists solely as a function return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
  Int,
  Void,
}

impl Type {
  pub fn from_keyword(keyword: &str) -> Option<Self> {
    match keyword {
      "int" => Some(Type::Int),
      "void" => Some(Type::Void),
      _ => None,
    }
  }

  pub fn is_integer(&self) -> bool {
    matches!(self, Type::Int)
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::Int => f.write_str("int"),
      Type::Void => f.write_str("void"),
    }
  }
}

/// Function signature registered before any body is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
  pub name: String,
  pub params: Vec<Type>,
  pub ret: Type,
}

impl fmt::Display for Signature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let params: Vec<String> = self.params.iter().map(Type::to_string).collect();
    write!(f, "{} {}({})", self.ret, self.name, params.join(", "))
  }
}
