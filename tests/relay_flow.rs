//! Verdict relay tests: verdicts arrive out of band and reach the user
//! without disturbing a conversation in progress.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use common::{Harness, TEST_TIMEOUT};
use intake_bot::channels::IncomingMessage;
use intake_bot::conversation::{ConversationId, Delivery, Dispatch};
use intake_bot::questionnaire::steps::YES;
use intake_bot::questionnaire::{Chain, Choice, StepSpec};
use intake_bot::relay::{Relay, SubscribeListener, Verdict};
use intake_bot::store::{Document, FormRepository};

const C: ConversationId = ConversationId(42);

fn chain() -> Chain {
    Chain::new(
        vec![
            StepSpec::yes_no("smokes", "Do you smoke?", "You answered: "),
            StepSpec::text("notes", "Anything else?"),
            StepSpec::finish("done", "Thanks", Choice::new("Again", "again")),
        ],
        0,
    )
    .unwrap()
}

async fn insert_checked_record(h: &Harness, id: &str) {
    let record = json!({
        "_id": id,
        "conversationId": C.as_i64(),
        "mark": 7,
        "doctorComment": "ok",
        "doctorName": "Dr. A",
        "checked": true,
    });
    let document: Document = record.as_object().cloned().unwrap();
    assert_eq!(h.repo.insert(&document).await.unwrap(), id);
}

fn assert_verdict_text(text: &str) {
    assert!(text.contains("Dr. A"), "{text}");
    assert!(text.contains("Оценка риска: 7"), "{text}");
    assert!(text.contains("Комментарий врача: ok"), "{text}");
}

#[tokio::test]
async fn ready_verdict_notifies_the_conversation() {
    let mut h = Harness::new(chain()).await;
    insert_checked_record(&h, "rec-1").await;

    let relay = Relay::new(h.repo.clone(), Arc::clone(&h.bus));
    relay
        .handle(Verdict::Ready {
            record_id: "rec-1".into(),
        })
        .await
        .unwrap();

    let (to, message) = h.next_message().await;
    assert_eq!(to, C);
    assert_verdict_text(&message.text);
}

#[tokio::test]
async fn unknown_record_is_skipped() {
    let mut h = Harness::new(chain()).await;
    let relay = Relay::new(h.repo.clone(), Arc::clone(&h.bus));
    relay
        .handle(Verdict::Ready {
            record_id: "missing".into(),
        })
        .await
        .unwrap();
    assert!(h.quiet_for(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn verdict_arrives_mid_conversation() {
    let mut h = Harness::new(chain()).await;
    insert_checked_record(&h, "rec-2").await;

    h.driver.dispatch(IncomingMessage::start(C));
    h.expect_prompt(C, "Do you smoke?").await;
    h.driver.dispatch(IncomingMessage::button(C, YES));
    h.expect_prompt(C, "Anything else?").await;

    let listener = SubscribeListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    Relay::new(h.repo.clone(), Arc::clone(&h.bus)).spawn(Arc::new(listener));

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    publisher.write_all(b"rec-2\n").await.unwrap();

    let (to, message) = h.next_message().await;
    assert_eq!(to, C);
    assert_verdict_text(&message.text);

    // The suspended step is untouched by the notification.
    assert_eq!(
        h.driver.dispatch(IncomingMessage::text(C, "nothing")),
        Dispatch::Response(Delivery::Accepted)
    );
    h.expect_prompt(C, "Thanks").await;
}

#[tokio::test]
async fn mark_verdict_updates_live_form() {
    let mut h = Harness::new(chain()).await;
    h.driver.dispatch(IncomingMessage::start(C));
    h.expect_prompt(C, "Do you smoke?").await;

    let listener = SubscribeListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    Relay::new(h.repo.clone(), Arc::clone(&h.bus)).spawn(Arc::new(listener));

    let mut publisher = TcpStream::connect(addr).await.unwrap();
    publisher
        .write_all(b"{\"type\":\"mark\",\"conversationId\":42,\"delta\":3}\n")
        .await
        .unwrap();

    timeout(TEST_TIMEOUT, async {
        while h.forms.get(C).map(|f| f.mark) != Some(3) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("mark never applied");
}
