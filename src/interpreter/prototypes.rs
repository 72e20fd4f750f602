//! Member access, indexing and the built-in prototypes of primitive values.

use std::sync::Arc;

use crate::{
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    span::Span,
    sync,
    value::{
        dict::{Dict, DictKey},
        element::{Child, Element},
        function::{FnArg, Function},
        structs::{StructDefinition, StructInstance},
        types::Type,
        List, Value,
    },
};

use super::Interpreter;

impl Interpreter {
    /// `value.name`: struct fields and methods, dict methods or keys, and
    /// the primitive prototypes.
    pub(crate) fn member(&self, value: &Value, name: &str, span: &Span) -> Result<Value, ExecutionError> {
        let found = match value {
            Value::StructInstance(instance) => {
                return self.instance_member(instance, value, name, span)
            }
            Value::StructDef(definition) => match definition.prototype.get(name) {
                Some(member) => {
                    self.check_private(definition, member.private, name, span)?;
                    Some(member.value)
                }
                None => None,
            },
            Value::Dict(dict) => {
                dict_method(dict, name).or_else(|| dict.get(&Value::string(name)))
            }
            Value::Ref(inner) => {
                let inner = sync::read(inner).clone();
                return self.member(&inner, name, span);
            }
            Value::String(s) => string_method(s, name),
            Value::List(list) => list_method(list, name),
            Value::Int(n) => int_method(*n, name),
            Value::Element(element) => element_method(element, name),
            Value::Function(function) => function_member(function, name).at(span)?,
            _ => None,
        };
        found.ok_or_else(|| unknown(value, name)).at(span)
    }

    fn instance_member(
        &self,
        instance: &Arc<StructInstance>,
        value: &Value,
        name: &str,
        span: &Span,
    ) -> Result<Value, ExecutionError> {
        let definition = &instance.definition;
        if let Some(index) = definition.field_index(name) {
            self.check_private(definition, definition.fields[index].private, name, span)?;
            return Ok(instance.fields()[index].clone());
        }

        let member = definition
            .prototype
            .get(name)
            .ok_or_else(|| unknown(value, name))
            .at(span)?;
        self.check_private(definition, member.private, name, span)?;
        match &member.value {
            Value::Function(function) if is_method(function, definition) => {
                Ok(Value::function(function.bind(value.clone())))
            }
            other => Ok(other.clone()),
        }
    }

    fn check_private(
        &self,
        definition: &StructDefinition,
        private: bool,
        name: &str,
        span: &Span,
    ) -> Result<(), ExecutionError> {
        if private && self.private_access != Some(definition.id) {
            return Err(ExecutionError::new(
                ExecutionErrorKind::PrivateAccess(name.to_string()),
                span.clone(),
            ));
        }
        Ok(())
    }

    /// `container.name = value`
    pub(crate) fn set_member(
        &mut self,
        container: &Value,
        name: &str,
        value: Value,
        span: &Span,
    ) -> Result<(), ExecutionError> {
        match container {
            Value::StructInstance(instance) => {
                let definition = &instance.definition;
                let index = definition
                    .field_index(name)
                    .ok_or_else(|| unknown(container, name))
                    .at(span)?;
                let field = &definition.fields[index];
                self.check_private(definition, field.private, name, span)?;
                let actual = value.type_of();
                if !field.ty.compare(&actual) {
                    return Err(ExecutionError::new(
                        ExecutionErrorKind::TypeMismatch(format!(
                            "cannot assign {actual} to field '{name}' of type {}",
                            field.ty
                        )),
                        span.clone(),
                    ));
                }
                instance.fields_mut()[index] = value;
                Ok(())
            }
            Value::Dict(dict) => dict_set(dict, Value::string(name), value).at(span),
            Value::Element(element) => {
                element.set_attribute(name, value);
                Ok(())
            }
            Value::Ref(inner) => {
                let inner = sync::read(inner).clone();
                self.set_member(&inner, name, value, span)
            }
            other => Err(unknown(other, name)).at(span),
        }
    }

    /// `value[key]`
    pub(crate) fn index(&mut self, value: &Value, key: Value, span: &Span) -> Result<Value, ExecutionError> {
        match value {
            Value::List(list) => list_get(list, &key).at(span),
            Value::String(s) => char_at(s, &key).at(span),
            Value::Dict(dict) => Ok(dict.get(&key).unwrap_or(Value::Nil)),
            Value::Element(element) => Ok(element
                .get_attribute(&key.to_string())
                .unwrap_or(Value::Nil)),
            Value::StructInstance(instance) => {
                if let Some(getter) = self.hook(instance, value, "__get__", span)? {
                    return self.call_value(&getter, vec![key], span);
                }
                self.member(value, &key.to_string(), span)
            }
            Value::Ref(inner) => {
                let inner = sync::read(inner).clone();
                self.index(&inner, key, span)
            }
            other => Err(ExecutionError::new(
                ExecutionErrorKind::InvalidOperand(other.type_of().to_string()),
                span.clone(),
            )),
        }
    }

    /// `container[key] = value`
    pub(crate) fn set_index(
        &mut self,
        container: &Value,
        key: Value,
        value: Value,
        span: &Span,
    ) -> Result<(), ExecutionError> {
        match container {
            Value::List(list) => list_set(list, &key, value).at(span),
            Value::Dict(dict) => dict_set(dict, key, value).at(span),
            Value::Element(element) => {
                element.set_attribute(&key.to_string(), value);
                Ok(())
            }
            Value::StructInstance(instance) => {
                if let Some(setter) = self.hook(instance, container, "__set__", span)? {
                    self.call_value(&setter, vec![key, value], span)?;
                    return Ok(());
                }
                self.set_member(container, &key.to_string(), value, span)
            }
            Value::Ref(inner) => {
                let inner = sync::read(inner).clone();
                self.set_index(&inner, key, value, span)
            }
            other => Err(ExecutionError::new(
                ExecutionErrorKind::InvalidOperand(other.type_of().to_string()),
                span.clone(),
            )),
        }
    }

    /// A user-defined `__get__`/`__set__`, bound to the instance.
    fn hook(
        &self,
        instance: &Arc<StructInstance>,
        value: &Value,
        name: &str,
        span: &Span,
    ) -> Result<Option<Value>, ExecutionError> {
        if instance.definition.prototype.get(name).is_none() {
            return Ok(None);
        }
        self.instance_member(instance, value, name, span).map(Some)
    }
}

/// Whether `function` takes the instance as its first argument.
pub(crate) fn is_method(function: &Function, definition: &StructDefinition) -> bool {
    function.bound.is_none()
        && function
            .args
            .first()
            .is_some_and(|arg| arg.ty == definition.instance_type())
}

fn unknown(value: &Value, name: &str) -> ExecutionErrorKind {
    ExecutionErrorKind::UnknownProperty {
        name: name.to_string(),
        ty: value.type_of().to_string(),
    }
}

/// Exact argument destructuring for natives; counts were checked already.
pub(crate) fn values<const N: usize>(args: Vec<Value>) -> Result<[Value; N], ExecutionErrorKind> {
    args.try_into().map_err(|args: Vec<Value>| ExecutionErrorKind::ArgumentCount {
        expected: N,
        minimum: N,
        got: args.len(),
    })
}

pub(crate) fn int_arg(value: &Value) -> Result<i64, ExecutionErrorKind> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Byte(b) => Ok(i64::from(*b)),
        other => Err(ExecutionErrorKind::TypeMismatch(format!(
            "expected int, got {}",
            other.type_of()
        ))),
    }
}

pub(crate) fn text_arg(value: &Value) -> Result<String, ExecutionErrorKind> {
    match value {
        Value::String(s) => Ok(s.to_string()),
        Value::Char(c) => Ok(c.to_string()),
        Value::Element(element) => Ok(element.render()),
        other => Err(ExecutionErrorKind::TypeMismatch(format!(
            "expected string, got {}",
            other.type_of()
        ))),
    }
}

fn function_arg(value: &Value) -> Result<Arc<Function>, ExecutionErrorKind> {
    match value {
        Value::Function(function) => Ok(function.clone()),
        other => Err(ExecutionErrorKind::NotCallable(other.type_of().to_string())),
    }
}

/// Position in `0..length`.
fn position(index: i64, length: usize) -> Result<usize, ExecutionErrorKind> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < length)
        .ok_or(ExecutionErrorKind::IndexOutOfRange { index, length })
}

fn char_index(haystack: &str, byte: Option<usize>) -> Value {
    Value::Int(byte.map_or(-1, |byte| haystack[..byte].chars().count() as i64))
}

fn char_at(s: &str, key: &Value) -> Result<Value, ExecutionErrorKind> {
    let index = int_arg(key)?;
    let length = s.chars().count();
    let at = position(index, length)?;
    s.chars()
        .nth(at)
        .map(Value::Char)
        .ok_or(ExecutionErrorKind::IndexOutOfRange { index, length })
}

fn string_method(s: &Arc<str>, name: &str) -> Option<Value> {
    let s = s.clone();
    let text = |arg: &str| vec![FnArg::new(arg, Type::STRING)];
    let function = match name {
        "length" => Function::native(name, vec![], Type::INT, move |_, _, _| {
            Ok(Some(Value::Int(s.chars().count() as i64)))
        }),
        "includes" => Function::native(name, text("value"), Type::BOOL, move |_, args, span| {
            let [needle] = values(args).at(span)?;
            Ok(Some(Value::Bool(s.contains(text_arg(&needle).at(span)?.as_str()))))
        }),
        "indexOf" => Function::native(name, text("value"), Type::INT, move |_, args, span| {
            let [needle] = values(args).at(span)?;
            Ok(Some(char_index(&s, s.find(text_arg(&needle).at(span)?.as_str()))))
        }),
        "lastIndexOf" => Function::native(name, text("value"), Type::INT, move |_, args, span| {
            let [needle] = values(args).at(span)?;
            Ok(Some(char_index(&s, s.rfind(text_arg(&needle).at(span)?.as_str()))))
        }),
        "startsWith" => Function::native(name, text("prefix"), Type::BOOL, move |_, args, span| {
            let [prefix] = values(args).at(span)?;
            Ok(Some(Value::Bool(s.starts_with(text_arg(&prefix).at(span)?.as_str()))))
        }),
        "endsWith" => Function::native(name, text("suffix"), Type::BOOL, move |_, args, span| {
            let [suffix] = values(args).at(span)?;
            Ok(Some(Value::Bool(s.ends_with(text_arg(&suffix).at(span)?.as_str()))))
        }),
        "toUpperCase" => Function::native(name, vec![], Type::STRING, move |_, _, _| {
            Ok(Some(Value::string(s.to_uppercase())))
        }),
        "toLowerCase" => Function::native(name, vec![], Type::STRING, move |_, _, _| {
            Ok(Some(Value::string(s.to_lowercase())))
        }),
        "capitalize" => Function::native(name, vec![], Type::STRING, move |_, _, _| {
            let mut chars = s.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            };
            Ok(Some(Value::string(capitalized)))
        }),
        "trim" => Function::native(name, vec![], Type::STRING, move |_, _, _| {
            Ok(Some(Value::string(s.trim())))
        }),
        "trimPrefix" => Function::native(name, text("prefix"), Type::STRING, move |_, args, span| {
            let [prefix] = values(args).at(span)?;
            let prefix = text_arg(&prefix).at(span)?;
            Ok(Some(Value::string(s.strip_prefix(prefix.as_str()).unwrap_or(&*s))))
        }),
        "trimSuffix" => Function::native(name, text("suffix"), Type::STRING, move |_, args, span| {
            let [suffix] = values(args).at(span)?;
            let suffix = text_arg(&suffix).at(span)?;
            Ok(Some(Value::string(s.strip_suffix(suffix.as_str()).unwrap_or(&*s))))
        }),
        "replace" => Function::native(
            name,
            vec![FnArg::new("old", Type::STRING), FnArg::new("new", Type::STRING)],
            Type::STRING,
            move |_, args, span| {
                let [old, new] = values(args).at(span)?;
                let (old, new) = (text_arg(&old).at(span)?, text_arg(&new).at(span)?);
                Ok(Some(Value::string(s.replace(old.as_str(), &new))))
            },
        ),
        "split" => Function::native(name, text("separator"), Type::list(Type::STRING), move |_, args, span| {
            let [separator] = values(args).at(span)?;
            let separator = text_arg(&separator).at(span)?;
            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).map(Value::string).collect()
            };
            Ok(Some(Value::list(parts, Type::STRING)))
        }),
        "substring" => {
            let length = s.chars().count() as i64;
            Function::native(
                name,
                vec![
                    FnArg::new("start", Type::INT),
                    FnArg::new("end", Type::INT).with_default(Value::Int(length)),
                ],
                Type::STRING,
                move |_, args, span| {
                    let [start, end] = values(args).at(span)?;
                    let (start, end) = (int_arg(&start).at(span)?, int_arg(&end).at(span)?);
                    let count = s.chars().count();
                    let (from, to) = range(start, end, count).at(span)?;
                    Ok(Some(Value::string(
                        s.chars().skip(from).take(to - from).collect::<String>(),
                    )))
                },
            )
        }
        "charAt" | "__get__" => {
            Function::native(name, vec![FnArg::new("index", Type::INT)], Type::CHAR, move |_, args, span| {
                let [index] = values(args).at(span)?;
                char_at(&s, &index).map(Some).at(span)
            })
        }
        _ => return None,
    };
    Some(Value::function(function))
}

/// `start..end` within `0..=length`.
fn range(start: i64, end: i64, length: usize) -> Result<(usize, usize), ExecutionErrorKind> {
    let bound = |index: i64| {
        usize::try_from(index)
            .ok()
            .filter(|i| *i <= length)
            .ok_or(ExecutionErrorKind::IndexOutOfRange { index, length })
    };
    let (from, to) = (bound(start)?, bound(end)?);
    if from > to {
        return Err(ExecutionErrorKind::Value(format!(
            "start {start} is after end {end}"
        )));
    }
    Ok((from, to))
}

fn list_get(list: &List, key: &Value) -> Result<Value, ExecutionErrorKind> {
    let items = list.read();
    let at = position(int_arg(key)?, items.len())?;
    Ok(items[at].clone())
}

fn check_item(list: &List, value: &Value) -> Result<(), ExecutionErrorKind> {
    let actual = value.type_of();
    if list.item_type.compare(&actual) {
        return Ok(());
    }
    Err(ExecutionErrorKind::TypeMismatch(format!(
        "cannot store {actual} in a list of {}",
        list.item_type
    )))
}

fn list_set(list: &List, key: &Value, value: Value) -> Result<(), ExecutionErrorKind> {
    check_item(list, &value)?;
    let mut items = list.write();
    let at = position(int_arg(key)?, items.len())?;
    items[at] = value;
    Ok(())
}

/// Calls `function` with `(item)` or `(item, index)`, depending on its arity.
fn call_each(
    interpreter: &mut Interpreter,
    function: &Function,
    item: Value,
    index: usize,
    span: &Span,
) -> Result<Value, ExecutionError> {
    let arity = function.args.len().saturating_sub(function.bound.iter().count());
    let args = if arity >= 2 {
        vec![item, Value::Int(index as i64)]
    } else {
        vec![item]
    };
    Ok(interpreter
        .call_function(function, args, span)?
        .unwrap_or(Value::Nil))
}

fn list_method(list: &Arc<List>, name: &str) -> Option<Value> {
    let list = list.clone();
    let item = list.item_type.clone();
    let of_items = Type::list(item.clone());
    let index = || FnArg::new("index", Type::INT);
    let function = match name {
        "__get__" | "get" => Function::native(name, vec![index()], item, move |_, args, span| {
            let [key] = values(args).at(span)?;
            list_get(&list, &key).map(Some).at(span)
        }),
        "__set__" => Function::native(
            name,
            vec![index(), FnArg::new("value", item)],
            Type::VOID,
            move |_, args, span| {
                let [key, value] = values(args).at(span)?;
                list_set(&list, &key, value).at(span)?;
                Ok(None)
            },
        ),
        "length" => Function::native(name, vec![], Type::INT, move |_, _, _| {
            Ok(Some(Value::Int(list.read().len() as i64)))
        }),
        "push" => Function::native(name, vec![FnArg::new("value", item)], Type::VOID, move |_, args, span| {
            let [value] = values(args).at(span)?;
            check_item(&list, &value).at(span)?;
            list.write().push(value);
            Ok(None)
        }),
        "pop" => Function::native(name, vec![], Type::ANY, move |_, _, _| {
            Ok(Some(list.write().pop().unwrap_or(Value::Nil)))
        }),
        "shift" => Function::native(name, vec![], Type::ANY, move |_, _, _| {
            let mut items = list.write();
            Ok(Some(if items.is_empty() {
                Value::Nil
            } else {
                items.remove(0)
            }))
        }),
        "unshift" => Function::native(name, vec![FnArg::new("value", item)], Type::VOID, move |_, args, span| {
            let [value] = values(args).at(span)?;
            check_item(&list, &value).at(span)?;
            list.write().insert(0, value);
            Ok(None)
        }),
        "insert" => Function::native(
            name,
            vec![index(), FnArg::new("value", item)],
            Type::VOID,
            move |_, args, span| {
                let [key, value] = values(args).at(span)?;
                check_item(&list, &value).at(span)?;
                let mut items = list.write();
                let index = int_arg(&key).at(span)?;
                let (at, _) = range(index, index, items.len()).at(span)?;
                items.insert(at, value);
                Ok(None)
            },
        ),
        "del" => Function::native(name, vec![index()], Type::ANY, move |_, args, span| {
            let [key] = values(args).at(span)?;
            let mut items = list.write();
            let at = position(int_arg(&key).at(span)?, items.len()).at(span)?;
            Ok(Some(items.remove(at)))
        }),
        "join" => Function::native(
            name,
            vec![FnArg::new("separator", Type::STRING).with_default(Value::string(""))],
            Type::STRING,
            move |_, args, span| {
                let [separator] = values(args).at(span)?;
                let separator = text_arg(&separator).at(span)?;
                let joined = list
                    .read()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(Some(Value::string(joined)))
            },
        ),
        "includes" => Function::native(name, vec![FnArg::new("value", Type::ANY)], Type::BOOL, move |_, args, span| {
            let [needle] = values(args).at(span)?;
            Ok(Some(Value::Bool(list.read().iter().any(|item| *item == needle))))
        }),
        "map" => Function::native(
            name,
            vec![FnArg::new("callback", Type::ANY)],
            Type::list(Type::ANY),
            move |interpreter, args, span| {
                let [callback] = values(args).at(span)?;
                let callback = function_arg(&callback).at(span)?;
                let items = list.read().clone();
                let mut mapped = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    mapped.push(call_each(interpreter, &callback, item, i, span)?);
                }
                let ty = super::types::common_type(&mapped);
                Ok(Some(Value::list(mapped, ty)))
            },
        ),
        "filter" => Function::native(
            name,
            vec![FnArg::new("predicate", Type::ANY)],
            of_items.clone(),
            move |interpreter, args, span| {
                let [predicate] = values(args).at(span)?;
                let predicate = function_arg(&predicate).at(span)?;
                let items = list.read().clone();
                let mut kept = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    match call_each(interpreter, &predicate, item.clone(), i, span)? {
                        Value::Bool(true) => kept.push(item),
                        Value::Bool(false) => {}
                        other => {
                            return Err(ExecutionError::new(
                                ExecutionErrorKind::ConditionNotBool(other.type_of().to_string()),
                                span.clone(),
                            ))
                        }
                    }
                }
                Ok(Some(Value::list(kept, list.item_type.clone())))
            },
        ),
        "slice" => {
            let length = list.read().len() as i64;
            Function::native(
                name,
                vec![
                    FnArg::new("start", Type::INT),
                    FnArg::new("end", Type::INT).with_default(Value::Int(length)),
                ],
                of_items,
                move |_, args, span| {
                    let [start, end] = values(args).at(span)?;
                    let items = list.read();
                    let (from, to) = range(
                        int_arg(&start).at(span)?,
                        int_arg(&end).at(span)?,
                        items.len(),
                    )
                    .at(span)?;
                    Ok(Some(Value::list(
                        items[from..to].to_vec(),
                        list.item_type.clone(),
                    )))
                },
            )
        }
        "clear" => Function::native(name, vec![], Type::VOID, move |_, _, _| {
            list.write().clear();
            Ok(None)
        }),
        "reverse" => Function::native(name, vec![], of_items, move |_, _, _| {
            list.write().reverse();
            Ok(Some(Value::List(list.clone())))
        }),
        _ => return None,
    };
    Some(Value::function(function))
}

fn dict_set(dict: &Dict, key: Value, value: Value) -> Result<(), ExecutionErrorKind> {
    let (key_type, value_type) = (key.type_of(), value.type_of());
    if !dict.key_type.compare(&key_type) || !dict.value_type.compare(&value_type) {
        return Err(ExecutionErrorKind::TypeMismatch(format!(
            "cannot store {key_type}: {value_type} in dict[{}, {}]",
            dict.key_type, dict.value_type
        )));
    }
    let hashed = DictKey::from_value(&key)
        .ok_or_else(|| ExecutionErrorKind::UnhashableKey(key_type.to_string()))?;
    dict.write().insert(hashed, value);
    Ok(())
}

fn dict_method(dict: &Arc<Dict>, name: &str) -> Option<Value> {
    let dict = dict.clone();
    let key = || FnArg::new("key", dict.key_type.clone());
    let function = match name {
        "get" => Function::native(name, vec![key()], Type::ANY, move |_, args, span| {
            let [key] = values(args).at(span)?;
            Ok(Some(dict.get(&key).unwrap_or(Value::Nil)))
        }),
        "set" => Function::native(
            name,
            vec![key(), FnArg::new("value", dict.value_type.clone())],
            Type::VOID,
            move |_, args, span| {
                let [key, value] = values(args).at(span)?;
                dict_set(&dict, key, value).at(span)?;
                Ok(None)
            },
        ),
        "has" => Function::native(name, vec![key()], Type::BOOL, move |_, args, span| {
            let [key] = values(args).at(span)?;
            let present = DictKey::from_value(&key).is_some_and(|key| dict.read().contains(&key));
            Ok(Some(Value::Bool(present)))
        }),
        "keys" => Function::native(name, vec![], Type::list(dict.key_type.clone()), move |_, _, _| {
            let keys = dict.read().keys().map(DictKey::to_value).collect();
            Ok(Some(Value::list(keys, dict.key_type.clone())))
        }),
        "values" => Function::native(name, vec![], Type::list(dict.value_type.clone()), move |_, _, _| {
            let values = dict.read().values().cloned().collect();
            Ok(Some(Value::list(values, dict.value_type.clone())))
        }),
        "length" => Function::native(name, vec![], Type::INT, move |_, _, _| {
            Ok(Some(Value::Int(dict.read().len() as i64)))
        }),
        "del" => Function::native(name, vec![key()], Type::ANY, move |_, args, span| {
            let [key] = values(args).at(span)?;
            let removed = DictKey::from_value(&key).and_then(|key| dict.write().remove(&key));
            Ok(Some(removed.unwrap_or(Value::Nil)))
        }),
        _ => return None,
    };
    Some(Value::function(function))
}

fn int_method(n: i64, name: &str) -> Option<Value> {
    let delta = match name {
        "increment" => 1,
        "decrement" => -1,
        _ => return None,
    };
    Some(Value::function(Function::native(name, vec![], Type::INT, move |_, _, span| {
        n.checked_add(delta)
            .map(|next| Some(Value::Int(next)))
            .ok_or_else(|| ExecutionErrorKind::Value("integer overflow".into()))
            .at(span)
    })))
}

fn element_method(element: &Arc<Element>, name: &str) -> Option<Value> {
    let element = element.clone();
    let attr = || FnArg::new("name", Type::STRING);
    let function = match name {
        "setAttribute" | "__set__" => Function::native(
            name,
            vec![attr(), FnArg::new("value", Type::ANY)],
            Type::VOID,
            move |_, args, span| {
                let [name, value] = values(args).at(span)?;
                element.set_attribute(&text_arg(&name).at(span)?, value);
                Ok(None)
            },
        ),
        "getAttribute" | "__get__" => Function::native(name, vec![attr()], Type::ANY, move |_, args, span| {
            let [name] = values(args).at(span)?;
            let value = element.get_attribute(&text_arg(&name).at(span)?);
            Ok(Some(value.unwrap_or(Value::Nil)))
        }),
        "hasAttribute" => Function::native(name, vec![attr()], Type::BOOL, move |_, args, span| {
            let [name] = values(args).at(span)?;
            let present = element.get_attribute(&text_arg(&name).at(span)?).is_some();
            Ok(Some(Value::Bool(present)))
        }),
        "removeAttribute" => Function::native(name, vec![attr()], Type::BOOL, move |_, args, span| {
            let [name] = values(args).at(span)?;
            Ok(Some(Value::Bool(
                element.remove_attribute(&text_arg(&name).at(span)?),
            )))
        }),
        "children" => Function::native(name, vec![], Type::list(Type::HTML), move |_, _, _| {
            let children = element
                .children()
                .iter()
                .map(|child| match child {
                    Child::Element(child) => Value::Element(child.clone()),
                    Child::Text { content, .. } => Value::string(content),
                })
                .collect();
            Ok(Some(Value::list(children, Type::HTML)))
        }),
        _ => return None,
    };
    Some(Value::function(function))
}

/// `__args__`, `__returns__`, `init(...)` and `call(...)` of a function.
fn function_member(function: &Arc<Function>, name: &str) -> Result<Option<Value>, ExecutionErrorKind> {
    let function = function.clone();
    Ok(Some(match name {
        "__args__" => {
            let mut args = Vec::new();
            for arg in function.args.iter().skip(function.bound.iter().count()) {
                args.push(Value::dict(
                    vec![
                        (Value::string("name"), Value::string(&arg.name)),
                        (Value::string("type"), Value::string(arg.ty.to_string())),
                        (
                            Value::string("default"),
                            arg.default.clone().unwrap_or(Value::Nil),
                        ),
                    ],
                    Type::STRING,
                    Type::ANY,
                )?);
            }
            Value::list(args, Type::dict(Type::STRING, Type::ANY))
        }
        "__returns__" => match &function.returns {
            Type::Union(members) => Value::list(
                members.iter().map(|ty| Value::string(ty.to_string())).collect(),
                Type::STRING,
            ),
            other => Value::string(other.to_string()),
        },
        "init" => Value::function(Function::variadic(
            name,
            Type::function(vec![], function.returns.clone()),
            move |_, args, _| {
                let target = function.clone();
                let name = target.display_name().to_string();
                let partial = Function::native(
                    &name,
                    vec![],
                    target.returns.clone(),
                    move |interpreter, _, span| {
                        interpreter.call_function(&target, args.clone(), span)
                    },
                );
                Ok(Some(Value::function(partial)))
            },
        )),
        "call" => Value::function(Function::variadic(
            name,
            function.returns.clone(),
            move |interpreter, args, span| interpreter.call_function(&function, args, span),
        )),
        _ => return Ok(None),
    }))
}
