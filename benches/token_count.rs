use chat_session::context::TokenAccountant;
use chat_session::conversation::Message;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn conversation(turns: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You are a helpful assistant.")];
    for turn in 0..turns {
        messages.push(Message::user(format!("Question {}: how does the weather change in spring?", turn)));
        messages.push(Message::assistant(format!(
            "Answer {}: temperatures rise, days grow longer and rainfall patterns shift.",
            turn
        )));
    }
    messages
}

fn bench_count_messages(c: &mut Criterion) {
    let accountant = TokenAccountant::new();
    let short = conversation(5);
    let long = conversation(200);
    accountant.count_messages(&short, "gpt-4").unwrap();

    c.bench_function("count_10_messages", |b| {
        b.iter(|| accountant.count_messages(black_box(&short), "gpt-4").unwrap())
    });
    c.bench_function("count_400_messages", |b| {
        b.iter(|| accountant.count_messages(black_box(&long), "gpt-4").unwrap())
    });
    c.bench_function("count_unknown_model", |b| {
        b.iter(|| accountant.count_messages(black_box(&short), "local-llama").unwrap())
    });
}

criterion_group!(benches, bench_count_messages);
criterion_main!(benches);
