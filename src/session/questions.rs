//! Exam question bank

use serde::{Deserialize, Serialize};

/// A multiple-choice question. `correct` is the option letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct: String,
}

impl Question {
    /// Case-insensitive, whitespace-tolerant answer check
    pub fn is_correct(&self, answer: &str) -> bool {
        answer.trim().eq_ignore_ascii_case(self.correct.trim())
    }
}

pub fn default_question_bank() -> Vec<Question> {
    let bank: [(&str, [&str; 4], &str); 10] = [
        (
            "What is a distributed system?",
            [
                "A) Single processor system",
                "B) Collection of independent computers",
                "C) Database system",
                "D) Network protocol",
            ],
            "B",
        ),
        (
            "Which algorithm ensures mutual exclusion?",
            [
                "A) Dijkstra's algorithm",
                "B) Ricart-Agrawala algorithm",
                "C) Bubble sort",
                "D) Linear search",
            ],
            "B",
        ),
        (
            "What is the purpose of Berkeley algorithm?",
            [
                "A) Clock synchronization",
                "B) Process scheduling",
                "C) Memory management",
                "D) File system",
            ],
            "A",
        ),
        (
            "What causes deadlock in distributed systems?",
            [
                "A) Fast processors",
                "B) Circular wait for resources",
                "C) Too much memory",
                "D) Network speed",
            ],
            "B",
        ),
        (
            "What is a critical section?",
            [
                "A) Code that crashes",
                "B) Code accessed by multiple processes",
                "C) Fast executing code",
                "D) Error handling code",
            ],
            "B",
        ),
        (
            "Which is NOT a distributed system characteristic?",
            [
                "A) Transparency",
                "B) Scalability",
                "C) Single point of failure",
                "D) Fault tolerance",
            ],
            "C",
        ),
        (
            "What is the main goal of load balancing?",
            [
                "A) Reduce system cost",
                "B) Distribute workload evenly",
                "C) Increase memory",
                "D) Faster processors",
            ],
            "B",
        ),
        (
            "Which protocol is used for reliable message delivery?",
            ["A) UDP", "B) TCP", "C) ICMP", "D) ARP"],
            "B",
        ),
        (
            "What is replication in distributed systems?",
            [
                "A) Copying data to multiple locations",
                "B) Deleting old data",
                "C) Compressing data",
                "D) Encrypting data",
            ],
            "A",
        ),
        (
            "What is the CAP theorem about?",
            [
                "A) Computer performance",
                "B) Consistency, Availability, Partition tolerance",
                "C) Network cables",
                "D) Database size",
            ],
            "B",
        ),
    ];

    bank.into_iter()
        .enumerate()
        .map(|(i, (prompt, options, correct))| Question {
            id: i as u32 + 1,
            prompt: prompt.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct: correct.to_string(),
        })
        .collect()
}
