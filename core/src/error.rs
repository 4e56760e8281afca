//! file: core/src/error.rs
//! description: build-phase error taxonomy for the recording engine.
//!
//! Every failure raised while recording or emitting is a `RecordError`.
//! They are synchronous and fatal for the emission that raised them; the
//! message always names the offending method, class or property so build
//! logs identify the source. Startup-phase (interpreter) failures use
//! plain `Result<_, String>` instead, see the `vm` module.

use std::fmt;

#[derive(Debug)]
pub enum RecordError {
    /// A recorder method returns a primitive or final type that cannot be
    /// proxied and is not wrapped in the runtime-value container.
    UnrecordableReturn { class: String, method: String, return_type: String },
    /// A return-value proxy minted by a runtime recorder was passed to a
    /// static-init recorder.
    CrossPhaseProxy { key: String, position: usize, method: String },
    /// No serialization dispatch branch matches the value.
    UnsupportedValue { detail: String },
    /// A string argument exceeds the recordable size limit.
    OversizedString { len: usize },
    /// A constructor-recordable class has more than one widest public
    /// constructor.
    AmbiguousConstructor { class: String },
    /// Multiple constructors are flagged for injection on a recorder class.
    AmbiguousInjectConstructor { class: String },
    /// No constructor could be determined for a recorder class.
    NoRecorderConstructor { class: String },
    /// A selected constructor is missing parameter-name metadata.
    MissingParameterNames { class: String },
    /// A read-only property shadows a backing field (strict mode).
    ReadOnlyProperty { class: String, property: String },
    /// Getter and setter of a property disagree on type (strict mode).
    SetterTypeMismatch {
        class: String,
        property: String,
        getter_type: String,
        setter_type: String,
    },
    /// Constructor parameters were not matched by any property or field.
    UnusedConstructorParameters { class: String, names: Vec<String> },
    /// No viable construction strategy for an object.
    NoViableConstructor { class: String },
    /// A sorted map backed by a custom comparator cannot be recorded; the
    /// comparator would be silently replaced by natural ordering.
    CustomComparator { class: String },
    /// An injected recorder-constructor parameter matched no constant and
    /// no config value.
    NoInjectableValue { class: String, param_type: String },
    /// A deferred node was requested after emission had already begun.
    LateAllocation,
    /// An arbitrary method was invoked directly on a returned proxy.
    DirectProxyCall { method: String, key: String },
    /// A class name used in recording is not present in the type registry.
    UnknownClass { name: String },
    /// A recorder method name is not declared on the recorder class.
    UnknownMethod { class: String, method: String },
    /// A registered non-default constructor extractor produced the wrong
    /// number of arguments.
    ExtractorArity { class: String, expected: usize, actual: usize },
    /// Wraps any of the above with the recorded call that triggered it.
    RecordCall { class: String, method: String, source: Box<RecordError> },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::UnrecordableReturn { class, method, return_type } => write!(
                f,
                "cannot use {}::{} as a recorder method: return type '{}' cannot be proxied; \
                 return void or wrap the value in runtime-value",
                class, method, return_type
            ),
            RecordError::CrossPhaseProxy { key, position, method } => write!(
                f,
                "invalid proxy '{}' passed to recorder: parameter {} of {} was created in a \
                 runtime recorder method, but this recorder runs during static init and the \
                 object will not exist yet",
                key, position, method
            ),
            RecordError::UnsupportedValue { detail } => {
                write!(f, "unsupported recorded value: {}", detail)
            }
            RecordError::OversizedString { len } => {
                write!(f, "string of {} bytes is too large to record (limit 65535)", len)
            }
            RecordError::AmbiguousConstructor { class } => write!(
                f,
                "unable to determine the recordable constructor for '{}': multiple public \
                 constructors share the widest parameter count",
                class
            ),
            RecordError::AmbiguousInjectConstructor { class } => {
                write!(f, "multiple injectable constructors on recorder class '{}'", class)
            }
            RecordError::NoRecorderConstructor { class } => write!(
                f,
                "could not determine a constructor for recorder class '{}': declare a single \
                 constructor or flag exactly one for injection",
                class
            ),
            RecordError::MissingParameterNames { class } => write!(
                f,
                "could not extract parameter names for the selected constructor of '{}'",
                class
            ),
            RecordError::ReadOnlyProperty { class, property } => write!(
                f,
                "cannot serialize property '{}' on '{}': the property is read only",
                property, class
            ),
            RecordError::SetterTypeMismatch { class, property, getter_type, setter_type } => {
                write!(
                    f,
                    "cannot serialize property '{}' on '{}': getter type '{}' and setter \
                     type '{}' differ",
                    property, class, getter_type, setter_type
                )
            }
            RecordError::UnusedConstructorParameters { class, names } => write!(
                f,
                "could not find values for constructor parameters {:?} of '{}': no matching \
                 property or field",
                names, class
            ),
            RecordError::NoViableConstructor { class } => write!(
                f,
                "unable to serialize objects of type '{}': no viable constructor",
                class
            ),
            RecordError::CustomComparator { class } => write!(
                f,
                "cannot record sorted map '{}': its custom comparator cannot be recorded and \
                 natural ordering would silently replace it",
                class
            ),
            RecordError::NoInjectableValue { class, param_type } => write!(
                f,
                "cannot inject constructor parameter of type '{}' on recorder '{}': no \
                 registered constant and no config value",
                param_type, class
            ),
            RecordError::LateAllocation => write!(
                f,
                "all parameters have already been loaded; it is too late to create a new \
                 deferred value"
            ),
            RecordError::DirectProxyCall { method, key } => write!(
                f,
                "cannot invoke '{}' directly on the returned value '{}'; pass it back into \
                 the recorder as a parameter instead",
                method, key
            ),
            RecordError::UnknownClass { name } => {
                write!(f, "class '{}' is not present in the type registry", name)
            }
            RecordError::UnknownMethod { class, method } => {
                write!(f, "method '{}' is not declared on recorder class '{}'", method, class)
            }
            RecordError::ExtractorArity { class, expected, actual } => write!(
                f,
                "registered constructor for '{}' takes {} parameters but the extractor \
                 produced {}",
                class, expected, actual
            ),
            RecordError::RecordCall { class, method, source } => {
                write!(f, "failed to record call to {}::{}: {}", class, method, source)
            }
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::RecordCall { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
