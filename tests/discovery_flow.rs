use std::time::Duration;

use mindflow::models::{canned_breakdown, DISCOVERY_CONTEXT};
use mindflow::{Core, FileSlot, MemorySlot, TaskStore, View};
use pretty_assertions::assert_eq;

fn new_core() -> Core {
    let store = TaskStore::open(MemorySlot::new()).unwrap();
    Core::new(store).with_thinking_latency(Duration::from_millis(5))
}

fn option_labels(core: &Core) -> Vec<String> {
    core.session()
        .unwrap()
        .options()
        .iter()
        .map(|o| o.label().to_string())
        .collect()
}

#[tokio::test]
async fn test_first_answer_leads_to_topic_question() {
    let core = new_core();
    core.start_discovery();

    let pending = core.select_option("感觉有些焦虑，事情太多").unwrap();
    assert!(pending.wait().await);

    let session = core.session().unwrap();
    assert_eq!(session.step(), 1);
    assert_eq!(
        option_labels(&core),
        vec!["工作项目", "个人成长", "两者都有关联"]
    );
}

#[tokio::test]
async fn test_reply_does_not_depend_on_answer_text() {
    let a = new_core();
    let b = new_core();
    a.start_discovery();
    b.start_discovery();

    a.select_option("感觉有些焦虑，事情太多").unwrap().wait().await;
    b.select_option("有一个模糊的目标，不知从何下手")
        .unwrap()
        .wait()
        .await;

    let last_ai = |core: &Core| core.session().unwrap().messages().last().unwrap().text.clone();
    assert_eq!(last_ai(&a), last_ai(&b));
    assert_eq!(option_labels(&a), option_labels(&b));
}

#[tokio::test]
async fn test_full_discovery_puts_new_task_first() {
    let core = new_core();
    core.start_discovery();

    for _ in 0..3 {
        let first = option_labels(&core)[0].clone();
        assert!(core.select_option(&first).unwrap().wait().await);
    }
    assert_eq!(core.session().unwrap().step(), 2);

    let task = core.take_action().unwrap();

    assert_eq!(task.title(), "梳理项目启动清单");
    assert_eq!(task.context(), Some(DISCOVERY_CONTEXT));
    assert!(!task.is_completed());
    assert_eq!(core.tasks()[0], task);
    assert_eq!(core.view(), View::Dashboard);
}

#[tokio::test]
async fn test_new_session_always_starts_fresh() {
    let core = new_core();
    core.start_discovery();
    let first = option_labels(&core)[0].clone();
    core.select_option(&first).unwrap().wait().await;
    core.close_discovery();

    let session = core.start_discovery();

    assert_eq!(session.step(), 0);
    assert_eq!(session.messages().len(), 1);
    assert_eq!(
        option_labels(&core),
        vec![
            "感觉有些焦虑，事情太多",
            "有一个模糊的目标，不知从何下手",
            "只是想找点灵感"
        ]
    );
}

#[tokio::test]
async fn test_breakdown_happens_once() {
    let core = new_core();
    let task = core.quick_add("Ship the prototype").unwrap();

    let broken = core.breakdown(task.id()).await.unwrap();
    assert_eq!(broken.subtasks(), Some(canned_breakdown().as_slice()));

    let again = core.breakdown(task.id()).await.unwrap();
    assert_eq!(again.subtasks(), broken.subtasks());
}

#[tokio::test]
async fn test_tasks_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");

    let core = Core::new(TaskStore::open(FileSlot::new(&path)).unwrap());
    let task = core.quick_add("Remember me").unwrap();
    core.breakdown(task.id()).await.unwrap();
    core.toggle_complete(task.id()).unwrap();
    let before = core.tasks();
    drop(core);

    let reopened = Core::new(TaskStore::open(FileSlot::new(&path)).unwrap());
    assert_eq!(reopened.tasks(), before);
    assert_eq!(reopened.view(), View::Entry);
}
