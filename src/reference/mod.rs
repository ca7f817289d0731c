//! Lazily-resolved proxies for expressions living inside a kernel.
//!
//! A [`Reference`] is an expression tree: composing attribute access,
//! indexing, and calls builds new nodes without touching the interpreter.
//! Only `copy`, `execute`, and `receive` materialize the expression, and
//! resolving the same reference twice re-evaluates it remotely.

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use serde_json::Value;

use crate::codec::{self, Payload, PAYLOAD_MIME};
use crate::error::{Error, Result};
use crate::notebook::Cell;
use crate::session::{randomize_name, Session};

/// A call or index argument: either a local value encoded as a literal,
/// or another reference.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Ref(Reference),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Reference> for Arg {
    fn from(reference: Reference) -> Self {
        Arg::Ref(reference)
    }
}

impl From<&Reference> for Arg {
    fn from(reference: &Reference) -> Self {
        Arg::Ref(reference.clone())
    }
}

enum Expr {
    Root(String),
    Attr { parent: Arc<Expr>, name: String },
    Item { parent: Arc<Expr>, key: Arg },
    Call {
        parent: Arc<Expr>,
        args: Vec<Arg>,
        kwargs: Vec<(String, Arg)>,
    },
}

fn root_name(expr: &Expr) -> &str {
    match expr {
        Expr::Root(name) => name,
        Expr::Attr { parent, .. } | Expr::Item { parent, .. } | Expr::Call { parent, .. } => {
            root_name(parent)
        }
    }
}

/// Handle to a remote expression. Clones share the underlying tree;
/// references carry no cached remote state.
#[derive(Clone)]
pub struct Reference {
    session: Session,
    expr: Arc<Expr>,
}

impl Reference {
    pub(crate) fn root(session: Session, name: &str) -> Self {
        Self {
            session,
            expr: Arc::new(Expr::Root(name.to_string())),
        }
    }

    /// Name of the root this expression hangs off.
    pub fn root_name(&self) -> &str {
        root_name(&self.expr)
    }

    pub fn is_from(&self, session: &Session) -> bool {
        self.session.same_session(session)
    }

    /// Attribute-access node: `self.<name>`.
    pub fn attr(&self, name: &str) -> Reference {
        self.derive(Expr::Attr {
            parent: self.expr.clone(),
            name: name.to_string(),
        })
    }

    /// Item-access node: `self[<key>]`.
    pub fn item(&self, key: impl Into<Arg>) -> Reference {
        self.derive(Expr::Item {
            parent: self.expr.clone(),
            key: key.into(),
        })
    }

    /// Call node with positional arguments only.
    pub fn call<I>(&self, args: I) -> Reference
    where
        I: IntoIterator<Item = Arg>,
    {
        self.call_kw(args, Vec::<(String, Arg)>::new())
    }

    /// Call node with positional and keyword arguments.
    pub fn call_kw<I, K>(&self, args: I, kwargs: K) -> Reference
    where
        I: IntoIterator<Item = Arg>,
        K: IntoIterator<Item = (String, Arg)>,
    {
        self.derive(Expr::Call {
            parent: self.expr.clone(),
            args: args.into_iter().collect(),
            kwargs: kwargs.into_iter().collect(),
        })
    }

    fn derive(&self, expr: Expr) -> Reference {
        Reference {
            session: self.session.clone(),
            expr: Arc::new(expr),
        }
    }

    /// Resolve this expression into injectable source text for its own
    /// session. Arguments bound to a different session are materialized
    /// as payloads first; they are never embedded textually.
    pub(crate) fn resolve(&self) -> BoxFuture<'_, Result<String>> {
        resolve_expr(&self.session, &self.expr)
    }

    /// Snapshot the expression's value under a randomized remote name.
    pub async fn copy(&self) -> Result<Reference> {
        self.copy_named(None).await
    }

    /// Snapshot under `name`, or a randomized one when omitted.
    pub async fn copy_named(&self, name: Option<&str>) -> Result<Reference> {
        let target = name
            .map(str::to_string)
            .unwrap_or_else(|| randomize_name(self.root_name()));
        let expr = self.resolve().await?;
        let code = self.session.codegen().assign(&target, &expr);
        self.session.execute_code(&code).await?;
        Ok(Reference::root(self.session.clone(), &target))
    }

    /// Run the expression for side effect, discarding its value.
    pub async fn execute(&self) -> Result<Cell> {
        let expr = self.resolve().await?;
        self.session.execute_code(&expr).await
    }

    pub async fn execute_many(references: &[Reference]) -> Result<Vec<Cell>> {
        try_join_all(references.iter().map(|r| r.execute())).await
    }

    /// Serialize the expression's value remotely, transfer it, and decode
    /// it locally.
    pub async fn receive(&self) -> Result<Value> {
        codec::decode_payload(&self.receive_raw().await?)
    }

    /// Transfer the encoded payload without decoding; used to relay a
    /// value between two sessions without a local round trip.
    pub async fn receive_raw(&self) -> Result<Payload> {
        let expr = self.resolve().await?;
        let code = self.session.codegen().encode_expr(&expr);
        let cell = self.session.execute_code(&code).await?;
        let text = cell
            .output()?
            .result_text(PAYLOAD_MIME)
            .ok_or_else(|| Error::encoding("kernel returned no transfer payload"))?;
        Ok(Payload::from_text(text))
    }

    pub async fn receive_many(references: &[Reference]) -> Result<Vec<Value>> {
        try_join_all(references.iter().map(|r| r.receive())).await
    }

    /// Remote length of the referenced value.
    pub async fn len(&self) -> Result<u64> {
        let expr = self.resolve().await?;
        let code = self.session.codegen().length(&expr);
        let value = Reference::root(self.session.clone(), &code).receive().await?;
        value
            .as_u64()
            .ok_or_else(|| Error::encoding(format!("length is not an integer: {value}")))
    }
}

fn resolve_expr<'a>(session: &'a Session, expr: &'a Expr) -> BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        match expr {
            Expr::Root(name) => Ok(name.clone()),
            Expr::Attr { parent, name } => {
                let parent = resolve_expr(session, parent).await?;
                Ok(session.codegen().attr(&parent, name))
            }
            Expr::Item { parent, key } => {
                let parent = resolve_expr(session, parent).await?;
                let key = resolve_arg(session, key).await?;
                Ok(session.codegen().item(&parent, &key))
            }
            Expr::Call {
                parent,
                args,
                kwargs,
            } => {
                let target = resolve_expr(session, parent).await?;
                let mut arg_texts = Vec::with_capacity(args.len());
                for arg in args {
                    arg_texts.push(resolve_arg(session, arg).await?);
                }
                let mut kwarg_texts = Vec::with_capacity(kwargs.len());
                for (name, arg) in kwargs {
                    kwarg_texts.push((name.clone(), resolve_arg(session, arg).await?));
                }
                Ok(session.codegen().call(&target, &arg_texts, &kwarg_texts))
            }
        }
    })
}

async fn resolve_arg(session: &Session, arg: &Arg) -> Result<String> {
    match arg {
        Arg::Value(value) => session.codegen().literal(value),
        Arg::Ref(reference) if reference.is_from(session) => {
            resolve_expr(session, &reference.expr).await
        }
        // foreign session: pull the value out as a payload and re-inject
        Arg::Ref(reference) => {
            let payload = reference.receive_raw().await?;
            Ok(session.codegen().payload_literal(&payload))
        }
    }
}
