//! file: core/src/object/class.rs
//! description: class descriptions used in place of runtime reflection.
//!
//! A `ClassSpec` describes one recordable class: its constructors (with
//! parameter names), bean-style properties, public fields, recorder method
//! descriptors and, for annotation types, the member list with defaults.
//! The serializer walks these descriptions exactly where the original
//! system walks reflective metadata. Specs are built fluently and then
//! registered with the [`TypeRegistry`](crate::object::TypeRegistry).

/// A constructor parameter. The name is optional because parameter-name
/// metadata can be absent; several construction strategies require it.
#[derive(Debug, Clone)]
pub struct CtorParam {
    pub name: Option<String>,
    pub ty: String,
}

#[derive(Debug, Clone)]
pub struct CtorSpec {
    pub params: Vec<CtorParam>,
    /// Flagged as the recordable constructor.
    pub recordable: bool,
    /// Flagged for injection (recorder classes only).
    pub inject: bool,
}

impl CtorSpec {
    pub fn is_no_arg(&self) -> bool {
        self.params.is_empty()
    }
}

/// A bean-style property: a getter of type `ty` and, when present, a setter
/// whose single parameter has type `setter_ty`. Additional setter overloads
/// participate in relaxed validation only.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: String,
    pub ty: String,
    pub setter_ty: Option<String>,
    pub setter_overloads: Vec<String>,
    pub ignored: bool,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: String,
    pub public: bool,
    pub is_final: bool,
    /// Transient or explicitly flagged as ignored; never serialized.
    pub ignored: bool,
}

/// One recorder-method parameter: its declared type and whether it was
/// flagged for relaxed validation.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub ty: String,
    pub relaxed: bool,
}

/// A stable method descriptor: declaring class, name, parameter list and
/// return type. This is the identity recorded calls carry.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub declaring_class: String,
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub ret: String,
}

/// An annotation member: name, type and optional default value. Members are
/// kept in declaration order; the generated literal constructor takes them
/// in that order.
#[derive(Debug, Clone)]
pub struct AnnotationMember {
    pub name: String,
    pub ty: String,
    pub default: Option<crate::object::RtValue>,
}

#[derive(Debug, Clone)]
pub struct ClassSpec {
    pub name: String,
    pub is_final: bool,
    pub ctors: Vec<CtorSpec>,
    pub properties: Vec<PropertySpec>,
    pub fields: Vec<FieldSpec>,
    pub methods: Vec<MethodSpec>,
    pub annotation_members: Vec<AnnotationMember>,
    pub enum_variants: Vec<String>,
}

impl ClassSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ClassSpec {
            name: name.into(),
            is_final: false,
            ctors: Vec::new(),
            properties: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            annotation_members: Vec::new(),
            enum_variants: Vec::new(),
        }
    }

    pub fn final_class(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Add a public constructor; parameters are `(name, type)` pairs.
    pub fn ctor(mut self, params: &[(&str, &str)]) -> Self {
        self.ctors.push(CtorSpec {
            params: params
                .iter()
                .map(|(n, t)| CtorParam { name: Some(n.to_string()), ty: t.to_string() })
                .collect(),
            recordable: false,
            inject: false,
        });
        self
    }

    /// Add a constructor whose parameter names are absent from the
    /// metadata.
    pub fn unnamed_ctor(mut self, param_types: &[&str]) -> Self {
        self.ctors.push(CtorSpec {
            params: param_types
                .iter()
                .map(|t| CtorParam { name: None, ty: t.to_string() })
                .collect(),
            recordable: false,
            inject: false,
        });
        self
    }

    /// Flag the most recently added constructor as the recordable one.
    pub fn recordable(mut self) -> Self {
        if let Some(last) = self.ctors.last_mut() {
            last.recordable = true;
        }
        self
    }

    /// Flag the most recently added constructor for injection.
    pub fn inject(mut self) -> Self {
        if let Some(last) = self.ctors.last_mut() {
            last.inject = true;
        }
        self
    }

    /// A property with matching getter and setter types.
    pub fn property(mut self, name: &str, ty: &str) -> Self {
        self.properties.push(PropertySpec {
            name: name.to_string(),
            ty: ty.to_string(),
            setter_ty: Some(ty.to_string()),
            setter_overloads: Vec::new(),
            ignored: false,
        });
        self
    }

    /// A property with a getter only.
    pub fn read_only_property(mut self, name: &str, ty: &str) -> Self {
        self.properties.push(PropertySpec {
            name: name.to_string(),
            ty: ty.to_string(),
            setter_ty: None,
            setter_overloads: Vec::new(),
            ignored: false,
        });
        self
    }

    /// A property whose getter and setter disagree on type.
    pub fn mismatched_property(mut self, name: &str, getter_ty: &str, setter_ty: &str) -> Self {
        self.properties.push(PropertySpec {
            name: name.to_string(),
            ty: getter_ty.to_string(),
            setter_ty: Some(setter_ty.to_string()),
            setter_overloads: Vec::new(),
            ignored: false,
        });
        self
    }

    /// Additional setter overload types for the most recently added
    /// property, considered under relaxed validation.
    pub fn setter_overloads(mut self, types: &[&str]) -> Self {
        if let Some(last) = self.properties.last_mut() {
            last.setter_overloads = types.iter().map(|t| t.to_string()).collect();
        }
        self
    }

    /// Flag the most recently added property or field as ignored.
    pub fn ignored(mut self) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.ignored = true;
        } else if let Some(last) = self.properties.last_mut() {
            last.ignored = true;
        }
        self
    }

    pub fn field(mut self, name: &str, ty: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: ty.to_string(),
            public: true,
            is_final: false,
            ignored: false,
        });
        self
    }

    /// A non-public backing field; never written, but its presence turns a
    /// read-only property into a strict-mode error.
    pub fn private_field(mut self, name: &str, ty: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: ty.to_string(),
            public: false,
            is_final: false,
            ignored: false,
        });
        self
    }

    pub fn final_field(mut self, name: &str, ty: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: ty.to_string(),
            public: true,
            is_final: true,
            ignored: false,
        });
        self
    }

    /// Declare a recorder method. Parameters are type names; use
    /// [`ClassSpec::relaxed_method`] when a parameter opts into relaxed
    /// validation.
    pub fn method(mut self, name: &str, params: &[&str], ret: &str) -> Self {
        self.methods.push(MethodSpec {
            declaring_class: self.name.clone(),
            name: name.to_string(),
            params: params
                .iter()
                .map(|t| ParamSpec { ty: t.to_string(), relaxed: false })
                .collect(),
            ret: ret.to_string(),
        });
        self
    }

    /// Declare a recorder method with per-parameter relaxed flags.
    pub fn relaxed_method(mut self, name: &str, params: &[(&str, bool)], ret: &str) -> Self {
        self.methods.push(MethodSpec {
            declaring_class: self.name.clone(),
            name: name.to_string(),
            params: params
                .iter()
                .map(|(t, relaxed)| ParamSpec { ty: t.to_string(), relaxed: *relaxed })
                .collect(),
            ret: ret.to_string(),
        });
        self
    }

    /// Declare an annotation member with an optional default.
    pub fn annotation_member(
        mut self,
        name: &str,
        ty: &str,
        default: Option<crate::object::RtValue>,
    ) -> Self {
        self.annotation_members.push(AnnotationMember {
            name: name.to_string(),
            ty: ty.to_string(),
            default,
        });
        self
    }

    /// Declare this class as an enum with the given variants.
    pub fn variants(mut self, variants: &[&str]) -> Self {
        self.enum_variants = variants.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn find_property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True when the class can be instantiated without arguments: either an
    /// explicit no-arg constructor or no declared constructors at all.
    pub fn has_default_ctor(&self) -> bool {
        self.ctors.is_empty() || self.ctors.iter().any(|c| c.is_no_arg())
    }

    pub fn is_enum(&self) -> bool {
        !self.enum_variants.is_empty()
    }

    pub fn is_annotation(&self) -> bool {
        !self.annotation_members.is_empty()
    }
}
