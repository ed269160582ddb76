use serde::Serialize;

/// Short, user-facing outcome of a failed action. Internal error text never
/// reaches these messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    #[error("Names and Words must be 4+ letters!")]
    FieldsTooShort,
    #[error("That name is taken!")]
    NameTaken,
    #[error("Incorrect Magic Name or Word!")]
    IncorrectLogin,
    #[error("The Magic Door is stuck.")]
    DoorStuck,
    #[error("Join the club first!")]
    NotSignedIn,
    #[error("Pick a hero and give your story a title!")]
    MissingStoryDetails,
    #[error("Your story could not reach Meera. Try again!")]
    RequestNotSent,
    #[error("The quill ran dry.")]
    QuillRanDry,
    #[error("Your creature needs a name and a picture!")]
    CharacterIncomplete,
    #[error("The lab could not save your creature.")]
    CharacterNotSaved,
    #[error("The lab could not let that creature go.")]
    CharacterNotDeleted,
    #[error("Brainstorming failed. Try drafting again.")]
    DraftingFailed,
    #[error("This book is already in the gallery.")]
    AlreadyPublished,
    #[error("Add at least one page before publishing.")]
    NothingToPublish,
    #[error(
        "This book is too large for the cloud gallery! We'll try to download the PDF for you anyway."
    )]
    TooLargeForGallery,
    #[error("Magic error! Please try publishing one more time.")]
    PublishFailed,
    #[error("Library connection interrupted.")]
    ConnectionInterrupted,
}

impl Notice {
    pub fn message(&self) -> String {
        self.to_string()
    }
}
