//! End-to-end tests against a real Python subprocess kernel.
//!
//! Skipped (returning early) when no `python3` is on the path.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tempfile::NamedTempFile;

use nbtest::{
    CellSelector, Error, FunctionReplacement, FunctionTracker, Reference, Session,
    SessionOptions, TrackOptions,
};

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn options() -> SessionOptions {
    SessionOptions {
        python: "python3".into(),
        timeout: Duration::from_secs(30),
    }
}

/// Write a throwaway notebook; each entry is (source, tags).
fn notebook(cells: &[(&str, &[&str])]) -> (NamedTempFile, PathBuf) {
    let doc = json!({
        "cells": cells
            .iter()
            .map(|(source, tags)| json!({
                "cell_type": "code",
                "source": source,
                "metadata": {"tags": tags},
                "outputs": []
            }))
            .collect::<Vec<_>>()
    });
    let mut file = NamedTempFile::new().expect("temp notebook");
    file.write_all(doc.to_string().as_bytes()).expect("write notebook");
    let path = file.path().to_path_buf();
    (file, path)
}

async fn started(path: &PathBuf) -> Session {
    let session = Session::open(path, &options()).expect("open session");
    session.start().await.expect("start kernel");
    session
}

#[tokio::test]
async fn receive_round_trips_values() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[(
        "nb_int = 1024\nnb_float = 5.25\nnb_str = 'text'\nnb_bool = True\n\
         nb_list = [1, 'a', None, 'b']\nnb_none = None\n\
         nb_dict = {'a': {'key': 'val'}, 'b': 2}",
        &[],
    )]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    assert_eq!(session.ref_to("nb_int").receive().await.unwrap(), json!(1024));
    assert_eq!(session.ref_to("nb_float").receive().await.unwrap(), json!(5.25));
    assert_eq!(session.ref_to("nb_str").receive().await.unwrap(), json!("text"));
    assert_eq!(session.ref_to("nb_bool").receive().await.unwrap(), json!(true));
    assert_eq!(
        session.ref_to("nb_list").receive().await.unwrap(),
        json!([1, "a", null, "b"])
    );
    assert_eq!(session.ref_to("nb_none").receive().await.unwrap(), json!(null));
    assert_eq!(
        session.ref_to("nb_dict").receive().await.unwrap(),
        json!({"a": {"key": "val"}, "b": 2})
    );

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn item_attr_and_call_composition() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[(
        "class Obj:\n    key = 'val'\n\
         nb_obj = Obj()\nnb_dict = {'a': nb_obj, 'b': 2}\n\
         def nb_swap(first, second, replace_second=None):\n    \
         return [replace_second if replace_second is not None else second, first]\n\
         a, b, c = 1, 2, 3",
        &[],
    )]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    assert_eq!(
        session.ref_to("nb_dict").item(json!("b")).receive().await.unwrap(),
        json!(2)
    );
    assert_eq!(
        session
            .ref_to("nb_dict")
            .item(json!("a"))
            .attr("key")
            .receive()
            .await
            .unwrap(),
        json!("val")
    );

    let swap = session.ref_to("nb_swap");
    // remote args
    let result = swap
        .call([session.ref_to("a").into(), session.ref_to("c").into()])
        .receive()
        .await
        .unwrap();
    assert_eq!(result, json!([3, 1]));
    // local + remote args, keyword included
    let result = swap
        .call_kw(
            [json!(10).into(), session.ref_to("c").into()],
            [("replace_second".to_string(), session.ref_to("b").into())],
        )
        .receive()
        .await
        .unwrap();
    assert_eq!(result, json!([2, 10]));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn copy_snapshots_before_mutation() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[("nb_list = [1, 'a', None, 'b']", &[])]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    let original = session.ref_to("nb_list");
    let copied = original.copy().await.unwrap();
    assert_eq!(
        copied.receive().await.unwrap(),
        original.receive().await.unwrap()
    );

    session.execute_code("nb_list = 3.142").await.unwrap();
    assert_eq!(copied.receive().await.unwrap(), json!([1, "a", null, "b"]));
    assert_eq!(original.receive().await.unwrap(), json!(3.142));
    assert_eq!(copied.len().await.unwrap(), 4);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn tagged_cells_execute_in_document_order() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[
        ("counter = 0", &[]),
        ("counter += 1", &["a"]),
        ("counter += 10", &["b"]),
        ("counter += 1", &["a"]),
    ]);
    let session = started(&path).await;

    let matched = session.cells_matching(&CellSelector::tag("a"));
    assert_eq!(
        matched.iter().map(|c| c.index).collect::<Vec<_>>(),
        vec![1, 3]
    );

    session.execute_cells(&CellSelector::all().ending_at("b")).await.unwrap();
    session.execute_cells(&CellSelector::tag("a")).await.unwrap();
    // counter = 0 + 1 + 10, then incremented exactly twice more
    assert_eq!(session.ref_to("counter").receive().await.unwrap(), json!(13));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn stdout_stderr_and_errors_are_captured() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[]);
    let session = started(&path).await;

    let cell = session
        .execute_code("import sys\nprint('hello')\nprint('warn', file=sys.stderr)")
        .await
        .unwrap();
    let output = cell.output().unwrap();
    assert_eq!(output.stdout.as_deref(), Some("hello\n"));
    assert_eq!(output.stderr.as_deref(), Some("warn\n"));

    let err = session.execute_code("1 / 0").await.unwrap_err();
    match err {
        Error::Remote { name, message, trace } => {
            assert_eq!(name, "ZeroDivisionError");
            assert!(message.contains("division"));
            assert!(!trace.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }

    // the kernel survives the exception
    assert_eq!(session.ref_to("1 + 1").receive().await.unwrap(), json!(2));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn session_stays_usable_after_a_cell_timeout() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[]);
    let session = Session::open(
        &path,
        &SessionOptions {
            python: "python3".into(),
            timeout: Duration::from_millis(200),
        },
    )
    .expect("open session");
    session.start().await.expect("start kernel");

    let err = session
        .execute_code("import time\ntime.sleep(1)")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "got {err}");

    // the abandoned execution finishes inside the kernel and its result
    // is discarded; later executions proceed normally
    tokio::time::sleep(Duration::from_secs(2)).await;
    session.execute_code("y = 5").await.unwrap();
    assert_eq!(session.ref_to("y").receive().await.unwrap(), json!(5));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn tracker_binds_all_parameter_kinds() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[(
        "def nb_fun(a, b=5, *rest, **extra):\n    return a + b + sum(rest)",
        &["definition"],
    )]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::tag("definition")).await.unwrap();

    let mut tracker = FunctionTracker::install(&session, "nb_fun", TrackOptions::all())
        .await
        .unwrap();
    session
        .execute_code("nb_fun(1)\nnb_fun(1, 2, 3, 4, extra_key='x')")
        .await
        .unwrap();
    tracker.restore().await.unwrap();

    let calls = tracker.receive().await.unwrap();
    assert_eq!(calls.len(), 2);

    // defaults fill in unbound parameters
    assert_eq!(calls[0].get("a"), Some(&json!(1)));
    assert_eq!(calls[0].get("b"), Some(&json!(5)));
    assert_eq!(calls[0].return_value(), Some(&json!(6)));

    // variadic positional and keyword catch-alls bind by declared name
    assert_eq!(calls[1].get("a"), Some(&json!(1)));
    assert_eq!(calls[1].get("b"), Some(&json!(2)));
    assert_eq!(calls[1].get("rest"), Some(&json!([3, 4])));
    assert_eq!(calls[1].get("extra"), Some(&json!({"extra_key": "x"})));
    assert_eq!(calls[1].return_value(), Some(&json!(10)));

    let first = tracker.receive_first().await.unwrap().unwrap();
    assert_eq!(first.get("a"), Some(&json!(1)));
    let last = tracker.receive_last().await.unwrap().unwrap();
    assert_eq!(last.get("rest"), Some(&json!([3, 4])));

    // restored: further calls are not logged
    session.execute_code("nb_fun(7)").await.unwrap();
    assert_eq!(tracker.receive().await.unwrap().len(), 2);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn tracker_filters_parameters_and_clears() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[("def nb_fun(a, b):\n    return a + b", &[])]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    let mut tracker = FunctionTracker::install(
        &session,
        "nb_fun",
        TrackOptions::parameters(["b"]).without_return_values(),
    )
    .await
    .unwrap();
    session.execute_code("nb_fun(1, 2)").await.unwrap();

    let calls = tracker.receive().await.unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].parameter_names(), ["b"]);
    assert!(!calls[0].contains("a"));
    assert_eq!(calls[0].return_value(), None);

    tracker.clear().await.unwrap();
    assert!(tracker.receive().await.unwrap().is_empty());
    assert!(tracker.receive_last().await.unwrap().is_none());

    tracker.restore().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn tracker_without_calls_leaves_target_unchanged() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[("def nb_fun(x):\n    return x * 2", &[])]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    let mut tracker = FunctionTracker::install(&session, "nb_fun", TrackOptions::all())
        .await
        .unwrap();
    tracker.restore().await.unwrap();

    assert!(tracker.receive().await.unwrap().is_empty());
    assert_eq!(
        session.ref_to("nb_fun").call([json!(21).into()]).receive().await.unwrap(),
        json!(42)
    );

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn tracker_logs_a_call_that_raises() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[("def nb_fun(x):\n    raise ValueError('bad')", &[])]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    let mut tracker = FunctionTracker::install(&session, "nb_fun", TrackOptions::all())
        .await
        .unwrap();
    let err = session.execute_code("nb_fun(9)").await.unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));

    let calls = tracker.receive().await.unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].get("x"), Some(&json!(9)));

    tracker.restore().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn replacement_substitutes_and_restores() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[("def greet():\n    return 'original'", &[])]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    let mut replacement = FunctionReplacement::install(
        &session,
        "greet",
        "def fake_greet():\n    return 'replaced'",
        "fake_greet",
    )
    .await
    .unwrap();
    assert_eq!(
        session.ref_to("greet").call([]).receive().await.unwrap(),
        json!("replaced")
    );

    replacement.restore().await.unwrap();
    assert_eq!(
        session.ref_to("greet").call([]).receive().await.unwrap(),
        json!("original")
    );

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn values_transfer_between_independent_sessions() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file1, path1) = notebook(&[(
        "a = 1\n\ndef nb_swap(first, second):\n    return [second, first]",
        &[],
    )]);
    let (_file2, path2) = notebook(&[("nb_int = 3072", &[])]);

    let home = started(&path1).await;
    let away = started(&path2).await;
    let all = CellSelector::all();
    let (r1, r2) = tokio::join!(home.execute_cells(&all), away.execute_cells(&all));
    r1.unwrap();
    r2.unwrap();

    // a foreign reference used as a call argument is relayed by value
    let result = home
        .ref_to("nb_swap")
        .call([home.ref_to("a").into(), away.ref_to("nb_int").into()])
        .receive()
        .await
        .unwrap();
    assert_eq!(result, json!([3072, 1]));

    // store a foreign reference under an explicit local name
    let stored = home.store_ref(&away.ref_to("nb_int"), Some("imported")).await.unwrap();
    assert_eq!(stored.root_name(), "imported");
    assert_eq!(home.ref_to("imported").receive().await.unwrap(), json!(3072));

    home.shutdown().await.unwrap();
    away.shutdown().await.unwrap();
}

#[tokio::test]
async fn store_and_gets_round_trip() {
    if !python_available() {
        println!("python3 not found, skipping");
        return;
    }
    let (_file, path) = notebook(&[("x = 1\ny = 2", &[])]);
    let session = started(&path).await;
    session.execute_cells(&CellSelector::all()).await.unwrap();

    let stored = session
        .store_value(&json!({"nested": [1, 2, 3]}), None)
        .await
        .unwrap();
    assert_eq!(
        stored.receive().await.unwrap(),
        json!({"nested": [1, 2, 3]})
    );

    let copies = session.gets(["x", "y"]).await.unwrap();
    session.execute_code("x = 99\ny = 99").await.unwrap();
    let values = Reference::receive_many(&copies).await.unwrap();
    assert_eq!(values, vec![json!(1), json!(2)]);

    session.shutdown().await.unwrap();
}
