use std::sync::Arc;

use crate::{
    ast::{self, ElementAttr, ElementChild},
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    span::Span,
    value::{
        element::{escape, kebab_case, Attribute, Child, Element},
        function::Function,
        structs::{StructDefinition, StructField},
        types::Type,
        Value,
    },
};

use super::Interpreter;

/// Built-in `Context { props, children }` handed to components.
pub(crate) fn context_definition() -> StructDefinition {
    StructDefinition::new(
        "Context",
        vec![
            StructField {
                name: "props".into(),
                ty: Type::dict(Type::STRING, Type::ANY),
                private: false,
            },
            StructField {
                name: "children".into(),
                ty: Type::list(Type::union(vec![Type::STRING, Type::HTML])),
                private: false,
            },
        ],
    )
}

fn is_component(tag: &str) -> bool {
    tag.rsplit('.')
        .next()
        .and_then(|name| name.chars().next())
        .is_some_and(char::is_uppercase)
}

impl Interpreter {
    pub(crate) fn evaluate_element(&mut self, element: &ast::Element) -> Result<Value, ExecutionError> {
        let mut attrs = Vec::with_capacity(element.attrs.len());
        for attr in &element.attrs {
            attrs.push(match attr {
                ElementAttr::Text(name, text) => (name.clone(), Some(Value::string(text))),
                ElementAttr::Dynamic(name, expression) => {
                    (name.clone(), Some(self.evaluate(expression)?))
                }
                ElementAttr::Bare(name) => (name.clone(), None),
            });
        }

        let mut children = Vec::with_capacity(element.children.len());
        for child in &element.children {
            match child {
                ElementChild::Element(nested) => {
                    let value = self.evaluate_element(nested)?;
                    push_child(&mut children, value, false);
                }
                ElementChild::RawText(text) => children.push(Child::Text {
                    content: text.clone(),
                    escaped: true,
                }),
                ElementChild::DynamicText { expr, unescaped } => {
                    let value = self.evaluate(expr)?;
                    push_child(&mut children, value, !unescaped);
                }
            }
        }

        if is_component(&element.tag) {
            return self.component(element, attrs, children);
        }

        let attrs = attrs
            .into_iter()
            .map(|(name, value)| Attribute {
                name: kebab_case(&name),
                value,
            })
            .collect();
        Ok(Value::Element(Arc::new(Element::new(
            element.tag.clone(),
            attrs,
            children,
            element.self_closing,
        ))))
    }

    fn component(
        &mut self,
        element: &ast::Element,
        attrs: Vec<(String, Option<Value>)>,
        children: Vec<Child>,
    ) -> Result<Value, ExecutionError> {
        let span = &element.span;
        let function = match self.resolve_name(&element.tag, span)? {
            Value::Function(function) => function,
            other => {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::NotCallable(other.type_of().to_string()),
                    span.clone(),
                ))
            }
        };

        let definition = self.engine.context_definition();
        if !accepts_context(&function, &definition.instance_type()) {
            return Err(ExecutionError::new(
                ExecutionErrorKind::TypeMismatch(format!(
                    "component '{}' must have the signature fn(Context) -> html, got {}",
                    element.tag,
                    function.type_of()
                )),
                span.clone(),
            ));
        }

        let props = attrs
            .into_iter()
            .map(|(name, value)| (Value::string(name), value.unwrap_or(Value::Bool(true))))
            .collect();
        let props = Value::dict(props, Type::STRING, Type::ANY).at(span)?;
        let children = children
            .into_iter()
            .map(|child| match child {
                Child::Element(element) => Value::Element(element),
                Child::Text { content, escaped: true } => Value::string(escape(&content)),
                Child::Text { content, .. } => Value::string(content),
            })
            .collect();
        let children = Value::list(children, Type::union(vec![Type::STRING, Type::HTML]));

        let context = definition.instantiate();
        {
            let mut fields = context.fields_mut();
            fields[0] = props;
            fields[1] = children;
        }
        tracing::trace!(component = %element.tag, "interpreter.component");
        let result = self.call_function(&function, vec![Value::StructInstance(Arc::new(context))], span)?;
        Ok(result.unwrap_or_else(|| Value::string("")))
    }
}

fn accepts_context(function: &Function, context: &Type) -> bool {
    let args = function
        .args
        .get(function.bound.iter().count()..)
        .unwrap_or_default();
    args.len() == 1 && args[0].ty.compare(context) && function.returns.compare(&Type::HTML)
}

/// Elements nest as elements, lists splice, everything else becomes text.
fn push_child(children: &mut Vec<Child>, value: Value, escaped: bool) {
    match value {
        Value::Element(element) => children.push(Child::Element(element)),
        Value::List(list) => {
            for item in list.read().iter() {
                push_child(children, item.clone(), escaped);
            }
        }
        Value::Nil => {}
        other => children.push(Child::Text {
            content: other.to_string(),
            escaped,
        }),
    }
}
