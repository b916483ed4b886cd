use super::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[derive(Clone, Debug, PartialEq)]
struct Obj {
    name: &'static str,
    value: u32,
    refs: Vec<&'static str>,
}

#[derive(Clone, Debug, PartialEq)]
struct Out {
    name: String,
    value: u32,
}

impl Keyed for Obj {
    fn key(&self) -> Key {
        Key::from(self.name)
    }
}

impl Keyed for Out {
    fn key(&self) -> Key {
        Key::from(self.name.as_str())
    }
}

fn obj(name: &'static str, value: u32) -> Obj {
    Obj {
        name,
        value,
        refs: vec![],
    }
}

fn out(name: &str, value: u32) -> Out {
    Out {
        name: name.to_string(),
        value,
    }
}

/// Records every event delivered to a collection's subscribers as
/// `(kind, key)` pairs.
fn record<T: Send + Sync + 'static>(c: &Collection<T>) -> Arc<Mutex<Vec<(&'static str, String)>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    c.subscribe(move |batch| {
        let mut recorded = recorded.lock();
        for ev in batch {
            let kind = match ev {
                Event::Added { .. } => "add",
                Event::Updated { .. } => "update",
                Event::Deleted { .. } => "delete",
            };
            recorded.push((kind, ev.key().to_string()));
        }
    });
    events
}

fn take(events: &Mutex<Vec<(&'static str, String)>>) -> Vec<(&'static str, String)> {
    std::mem::take(&mut *events.lock())
}

#[test]
fn map_suppresses_equal_outputs() {
    let rt = Runtime::default();
    let input = rt.input::<Obj>("objs");
    let doubled = rt.map("doubled", &input.collection(), |_, o: &Obj| {
        Some(out(o.name, (o.value / 2) * 2))
    });
    let events = record(&doubled);

    input.apply(obj("a", 2));
    rt.flush();
    assert_eq!(take(&events), vec![("add", "a".to_string())]);
    assert_eq!(doubled.get("a").map(|o| o.value), Some(2));

    // The input changes but the output does not.
    input.apply(obj("a", 3));
    rt.flush();
    assert_eq!(take(&events), vec![]);

    input.apply(obj("a", 4));
    rt.flush();
    assert_eq!(take(&events), vec![("update", "a".to_string())]);

    input.delete("a");
    rt.flush();
    assert_eq!(take(&events), vec![("delete", "a".to_string())]);
    assert!(doubled.is_empty());
}

#[test]
fn changes_within_a_flush_coalesce() {
    let rt = Runtime::default();
    let input = rt.input::<Obj>("objs");
    let events = record(&input.collection());

    input.apply(obj("a", 1));
    input.apply(obj("a", 2));
    input.apply(obj("b", 1));
    input.delete("b");
    rt.flush();
    assert_eq!(take(&events), vec![("add", "a".to_string())]);
    assert_eq!(input.collection().get("a").map(|o| o.value), Some(2));
}

#[test]
fn fetch_one_recomputes_only_dependents() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let configs = rt.input::<Obj>("configs");

    let calls = Arc::new(AtomicUsize::new(0));
    let sums = {
        let configs = configs.collection();
        let calls = calls.clone();
        rt.map("sums", &objs.collection(), move |ctx, o: &Obj| {
            calls.fetch_add(1, Ordering::SeqCst);
            let total = o
                .refs
                .iter()
                .filter_map(|r| ctx.fetch_one(&configs, r))
                .map(|c| c.value)
                .sum::<u32>();
            Some(out(o.name, o.value + total))
        })
    };

    configs.apply(obj("x", 10));
    configs.apply(obj("y", 100));
    objs.apply(Obj {
        name: "a",
        value: 1,
        refs: vec!["x"],
    });
    objs.apply(Obj {
        name: "b",
        value: 2,
        refs: vec!["y"],
    });
    rt.flush();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sums.get("a").map(|o| o.value), Some(11));
    assert_eq!(sums.get("b").map(|o| o.value), Some(102));

    configs.apply(obj("x", 20));
    rt.flush();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sums.get("a").map(|o| o.value), Some(21));

    // Unreferenced keys do not trigger recomputation.
    configs.apply(obj("z", 1));
    rt.flush();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // A dependency on a key that does not exist yet is still tracked.
    objs.apply(Obj {
        name: "c",
        value: 0,
        refs: vec!["w"],
    });
    rt.flush();
    assert_eq!(sums.get("c").map(|o| o.value), Some(0));
    configs.apply(obj("w", 7));
    rt.flush();
    assert_eq!(sums.get("c").map(|o| o.value), Some(7));
}

#[test]
fn fetch_all_depends_on_every_key() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let configs = rt.input::<Obj>("configs");
    let counted = {
        let configs = configs.collection();
        rt.map("counted", &objs.collection(), move |ctx, o: &Obj| {
            Some(out(o.name, ctx.fetch(&configs).len() as u32))
        })
    };

    objs.apply(obj("a", 0));
    rt.flush();
    assert_eq!(counted.get("a").map(|o| o.value), Some(0));

    configs.apply(obj("x", 0));
    configs.apply(obj("y", 0));
    rt.flush();
    assert_eq!(counted.get("a").map(|o| o.value), Some(2));
}

#[test]
fn flat_map_fans_out_and_cleans_up() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let parts = rt.flat_map("parts", &objs.collection(), |_, o: &Obj| {
        (0..o.value)
            .map(|i| out(&format!("{}.{i}", o.name), i))
            .collect()
    });

    objs.apply(obj("a", 3));
    rt.flush();
    assert_eq!(
        parts.keys().into_iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        vec!["a.0", "a.1", "a.2"]
    );

    objs.apply(obj("a", 1));
    rt.flush();
    assert_eq!(parts.len(), 1);

    objs.delete("a");
    rt.flush();
    assert!(parts.is_empty());
}

#[test]
fn flat_map_duplicate_keys_prefer_lowest_source() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let shared = rt.flat_map("shared", &objs.collection(), |_, o: &Obj| {
        vec![out("shared", o.value)]
    });

    objs.apply(obj("b", 2));
    rt.flush();
    assert_eq!(shared.get("shared").map(|o| o.value), Some(2));

    objs.apply(obj("a", 1));
    rt.flush();
    assert_eq!(shared.get("shared").map(|o| o.value), Some(1));

    objs.delete("a");
    rt.flush();
    assert_eq!(shared.get("shared").map(|o| o.value), Some(2));
}

#[test]
fn join_prefers_earlier_sources() {
    let rt = Runtime::default();
    let first = rt.input::<Obj>("first");
    let second = rt.input::<Obj>("second");
    let joined = rt.join("joined", vec![first.collection(), second.collection()]);

    second.apply(obj("a", 2));
    second.apply(obj("b", 2));
    rt.flush();
    assert_eq!(joined.len(), 2);

    first.apply(obj("a", 1));
    rt.flush();
    assert_eq!(joined.get("a").map(|o| o.value), Some(1));

    first.delete("a");
    rt.flush();
    assert_eq!(joined.get("a").map(|o| o.value), Some(2));
}

#[test]
fn index_lookups_track_index_keys() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let by_ref = rt.index("by-ref", &objs.collection(), |o: &Obj| {
        o.refs.iter().map(|r| Key::from(*r)).collect()
    });
    let groups = rt.input::<Obj>("groups");
    let members = {
        let by_ref = by_ref.clone();
        rt.map("members", &groups.collection(), move |ctx, g: &Obj| {
            Some(out(g.name, ctx.fetch_index(&by_ref, g.name).len() as u32))
        })
    };

    groups.apply(obj("g1", 0));
    groups.apply(obj("g2", 0));
    objs.apply(Obj {
        name: "a",
        value: 0,
        refs: vec!["g1"],
    });
    rt.flush();
    assert_eq!(members.get("g1").map(|o| o.value), Some(1));
    assert_eq!(members.get("g2").map(|o| o.value), Some(0));

    objs.apply(Obj {
        name: "a",
        value: 0,
        refs: vec!["g2"],
    });
    rt.flush();
    assert_eq!(members.get("g1").map(|o| o.value), Some(0));
    assert_eq!(members.get("g2").map(|o| o.value), Some(1));
    assert_eq!(by_ref.lookup("g2").len(), 1);
}

#[test]
fn status_collections_split_outputs() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let (statuses, outputs) = rt.status("things", &objs.collection(), |_, o: &Obj| {
        let status = out(o.name, o.value);
        let outputs = (0..o.value).map(|i| out(&format!("{}-{i}", o.name), i)).collect();
        (Some(status), outputs)
    });

    objs.apply(obj("a", 2));
    rt.flush();
    assert_eq!(statuses.get("a"), Some(Arc::new(out("a", 2))));
    assert_eq!(outputs.len(), 2);

    objs.delete("a");
    rt.flush();
    assert!(statuses.is_empty());
    assert!(outputs.is_empty());
}

#[test]
fn recompute_protected_requires_mark_dirty() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let offset = rt.recompute_protected("offset", 10u32);
    let shifted = {
        let offset = offset.clone();
        rt.map("shifted", &objs.collection(), move |ctx, o: &Obj| {
            Some(out(o.name, o.value + offset.get(ctx)))
        })
    };

    objs.apply(obj("a", 1));
    rt.flush();
    assert_eq!(shifted.get("a").map(|o| o.value), Some(11));

    offset.update(|v| *v = 20);
    rt.flush();
    assert_eq!(shifted.get("a").map(|o| o.value), Some(11));
    assert_eq!(offset.access_unprotected(), 20);

    offset.mark_dirty();
    rt.flush();
    assert_eq!(shifted.get("a").map(|o| o.value), Some(21));
}

#[test]
fn sync_state() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let mapped = rt.map("mapped", &objs.collection(), |_, o: &Obj| Some(out(o.name, 0)));
    rt.flush();
    assert!(!rt.has_synced());

    objs.reset(vec![obj("a", 1)]);
    rt.flush();
    assert!(mapped.has_synced());
    assert!(rt.has_synced());
}

#[test]
fn reset_removes_missing() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let events = record(&objs.collection());
    objs.apply(obj("a", 1));
    objs.apply(obj("b", 1));
    rt.flush();
    take(&events);

    objs.reset(vec![obj("b", 1), obj("c", 1)]);
    rt.flush();
    assert_eq!(
        take(&events),
        vec![("delete", "a".to_string()), ("add", "c".to_string())]
    );
}

#[test]
fn late_subscribers_receive_current_state() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    objs.apply(obj("a", 1));
    rt.flush();
    let events = record(&objs.collection());
    assert_eq!(take(&events), vec![("add", "a".to_string())]);
}

#[test]
fn kubernetes_objects_are_keyed_by_namespace_and_name() {
    let mut ns = k8s_openapi::api::core::v1::Namespace::default();
    ns.metadata.name = Some("ns-0".to_string());
    assert_eq!(ns.key().as_str(), "ns-0");

    let mut svc = k8s_openapi::api::core::v1::Service::default();
    svc.metadata.namespace = Some("default".to_string());
    svc.metadata.name = Some("web".to_string());
    assert_eq!(svc.key().as_str(), "default/web");
}

#[tokio::test(flavor = "current_thread")]
async fn run_flushes_until_shutdown() {
    let rt = Runtime::default();
    let objs = rt.input::<Obj>("objs");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    objs.collection().subscribe(move |batch| {
        for ev in batch {
            let _ = tx.send(ev.key().to_string());
        }
    });

    let (signal, shutdown) = drain::channel();
    let task = tokio::spawn(rt.clone().run(shutdown));

    objs.apply(obj("a", 1));
    assert_eq!(rx.recv().await.as_deref(), Some("a"));

    objs.apply(obj("b", 1));
    signal.drain().await;
    task.await.expect("runtime task must not panic");
    assert_eq!(rx.recv().await.as_deref(), Some("b"));
    assert!(rt.is_stopped());
}
